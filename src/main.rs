use std::path::PathBuf;
use std::process::exit;

use clap::error::ErrorKind;
use clap::Parser;
use simple_logger::SimpleLogger;

use comm2osm::conf::{Config, DEFAULT_LANG_CODE_TABLE};
use comm2osm::output;

/// Convert routable shapefile datasets into OSM files.
#[derive(Parser, Debug)]
#[command(name = "comm2osm", version)]
struct Args {
    /// Root directory searched recursively for datasets
    input_dir: PathBuf,

    /// Output file; the suffix selects the format (.osm XML, .pbf)
    output_file: Option<PathBuf>,

    /// ISO-639-2 to ISO-639-1 lookup table
    #[arg(long, default_value = DEFAULT_LANG_CODE_TABLE)]
    lang_code_table: PathBuf,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            exit(0);
        }
        Err(e) => {
            let _ = e.print();
            exit(1);
        }
    };

    let level = match args.verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    let _ = SimpleLogger::new().with_level(level).init();

    if let Some(output_file) = &args.output_file {
        if let Err(e) = output::output_format(output_file) {
            eprintln!("{}", e);
            exit(1);
        }
    }

    let mut config = Config::new(args.input_dir, args.output_file);
    config.lang_code_table = args.lang_code_table;

    match comm2osm::run(&config) {
        Ok(stats) => println!("{}", stats.summary()),
        Err(e) => {
            eprintln!("error: {:#}", e);
            exit(1);
        }
    }
}
