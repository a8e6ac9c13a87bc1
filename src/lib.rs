pub mod boundaries;
pub mod conf;
pub mod context;
pub mod error;
pub mod geometry;
pub mod interpolation;
pub mod io;
pub mod output;
pub mod places;
pub mod restrictions;
pub mod streets;
pub mod tags;
pub mod zlevels;

use benchmark_rs::stopwatch::StopWatch;
use log::info;

pub use conf::Config;
use context::RunContext;
use streets::StreetGraphBuilder;
use tags::{SideTables, TagTranslator};
use zlevels::ZLevelMap;

#[derive(Debug, Default)]
pub struct RunStats {
    pub dataset_dirs: usize,
    pub node_count: usize,
    pub way_count: usize,
    pub relation_count: usize,
}

impl RunStats {
    pub fn summary(&self) -> String {
        format!(
            "converted {} dataset dir(s) into {} nodes, {} ways, {} relations",
            self.dataset_dirs, self.node_count, self.way_count, self.relation_count
        )
    }
}

/// Runs the whole conversion: discovery, side tables, street graph, turn
/// restrictions, boundary/water/land-use relations, place nodes, output.
pub fn run(config: &Config) -> anyhow::Result<RunStats> {
    let mut stopwatch = StopWatch::new();
    stopwatch.start();

    let dirs = io::dataset_dirs(&config.input_dir)?;
    if dirs.is_empty() {
        anyhow::bail!("no complete dataset found below {}", config.input_dir.display());
    }
    for dir in &dirs {
        info!("found dataset: {}", dir.display());
    }

    let mut ctx = RunContext::new();

    info!("loading side tables");
    let mut z_level_map = ZLevelMap::default();
    let mut mtd_areas = boundaries::MtdAreaMap::new();
    let mut tables = SideTables::default();
    for dir in &dirs {
        zlevels::read_z_levels(&dir.join(io::ZLEVELS_DBF), &mut z_level_map)?;
        boundaries::read_mtd_areas(&dir.join(io::MTD_AREA_DBF), &mut mtd_areas)?;

        for row in io::read_dbf_rows(&dir.join(io::CDMS_DBF), io::CdmsRow::from_record)? {
            tables.cdms.insert(row.link_id, (row.cond_id, row.cond_type));
        }
        if io::file_exists(dir, io::CND_MOD_DBF) {
            for row in io::read_dbf_rows(&dir.join(io::CND_MOD_DBF), io::CndModRow::from_record)? {
                tables
                    .cnd_mods
                    .entry(row.cond_id)
                    .or_default()
                    .push((row.mod_type, row.mod_val));
            }
        }
        if io::file_exists(dir, io::MTD_CNTRY_REF_DBF) {
            for row in
                io::read_dbf_rows(&dir.join(io::MTD_CNTRY_REF_DBF), io::CntryRefRow::from_record)?
            {
                tables.cntry_refs.insert(row.govt_code, row);
            }
        }
        for row in io::read_dbf_rows(&dir.join(io::ALT_STREETS_DBF), io::AltStreetRow::from_record)?
        {
            if let Some(route_type) = row.route_type {
                tables
                    .route_types
                    .entry(row.link_id)
                    .and_modify(|existing| *existing = (*existing).min(route_type))
                    .or_insert(route_type);
            }
        }
        for table in [io::MAJ_HWYS_DBF, io::SEC_HWYS_DBF] {
            for row in io::read_dbf_rows(&dir.join(table), io::HighwayNameRow::from_record)? {
                tables
                    .highway_names
                    .entry(row.link_id)
                    .or_default()
                    .push(row.highway_nm);
            }
        }
    }
    for area in mtd_areas.values() {
        if area.govt_code != 0 {
            tables.area_govt_codes.insert(area.area_id, area.govt_code);
        }
    }
    let translator = TagTranslator::new(tables, config.lang_code_table.clone());

    info!("processing street shapes");
    for dir in &dirs {
        let streets = io::read_street_features(&dir.join(io::STREETS_SHP))?;
        let mut builder = StreetGraphBuilder::new(&mut ctx, &translator, &z_level_map);
        builder.process_way_end_nodes(&streets);
        builder.process_ways(&streets)?;
    }
    info!("street phase done, time: {}", stopwatch);

    info!("processing turn restrictions");
    restrictions::add_turn_restrictions(&mut ctx, &dirs)?;

    info!("processing administrative boundaries");
    for dir in &dirs {
        boundaries::add_admin_boundaries(&mut ctx, dir, &translator, &mtd_areas)?;
    }

    info!("processing water and land use");
    for dir in &dirs {
        boundaries::add_water(&mut ctx, dir)?;
        boundaries::add_landuse(&mut ctx, dir)?;
    }

    info!("processing named places");
    for dir in &dirs {
        places::add_city_nodes(&mut ctx, dir)?;
    }

    if let Some(output_file) = &config.output_file {
        info!("writing {}", output_file.display());
        output::write_output(&ctx, output_file)?;
    }

    let stats = RunStats {
        dataset_dirs: dirs.len(),
        node_count: ctx.nodes.len(),
        way_count: ctx.ways.len(),
        relation_count: ctx.relations.len(),
    };
    info!("finished conversion, time: {}", stopwatch);
    Ok(stats)
}
