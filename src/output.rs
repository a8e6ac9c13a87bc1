use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use osm_io::osm::model::element::Element;
use osm_io::osm::model::node::Node;
use osm_io::osm::model::relation::{Member, Relation};
use osm_io::osm::model::tag::Tag;
use osm_io::osm::model::way::Way;
use osm_io::osm::pbf;
use osm_io::osm::pbf::compression_type::CompressionType;
use osm_io::osm::pbf::file_info::FileInfo;

use crate::context::RunContext;
use crate::error::{ConvertError, Result};

const WRITING_PROGRAM: &str = "comm2osm";
/// Dummy timestamp 1 rendered the way OSM XML expects timestamps.
const XML_TIMESTAMP: &str = "1970-01-01T00:00:01Z";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Xml,
    Pbf,
}

/// The output file suffix selects the format: `.osm` XML, `.pbf` PBF.
pub fn output_format(path: &Path) -> Result<OutputFormat> {
    let suffix = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase());
    match suffix.as_deref() {
        Some("osm") => Ok(OutputFormat::Xml),
        Some("pbf") => Ok(OutputFormat::Pbf),
        _ => Err(ConvertError::UnknownFormat(path.display().to_string())),
    }
}

/// Writes the accumulated objects: all nodes, then all ways, then all
/// relations, each in allocation order.
pub fn write_output(ctx: &RunContext, path: &Path) -> anyhow::Result<()> {
    match output_format(path)? {
        OutputFormat::Pbf => write_pbf(ctx, path),
        OutputFormat::Xml => write_xml(ctx, path),
    }
}

fn write_pbf(ctx: &RunContext, path: &Path) -> anyhow::Result<()> {
    let mut file_info = FileInfo::default();
    file_info.with_writingprogram_str(WRITING_PROGRAM);
    let mut writer =
        pbf::writer::Writer::from_file_info(path.to_path_buf(), file_info, CompressionType::Zlib)?;
    writer.write_header()?;
    for node in &ctx.nodes {
        writer.write_element(Element::Node { node: node.clone() })?;
    }
    for way in &ctx.ways {
        writer.write_element(Element::Way { way: way.clone() })?;
    }
    for relation in &ctx.relations {
        writer.write_element(Element::Relation { relation: relation.clone() })?;
    }
    writer.close()?;
    Ok(())
}

fn write_xml(ctx: &RunContext, path: &Path) -> anyhow::Result<()> {
    let file = File::create(path)?;
    let mut writer = XmlWriter::new(BufWriter::new(file));
    writer.write_header()?;
    for node in &ctx.nodes {
        writer.write_node(node)?;
    }
    for way in &ctx.ways {
        writer.write_way(way)?;
    }
    for relation in &ctx.relations {
        writer.write_relation(relation)?;
    }
    writer.finish()?;
    Ok(())
}

/// Plain OSM XML writer. osm-io only writes PBF, the XML side is small
/// enough to keep here.
pub struct XmlWriter<W> {
    inner: W,
}

impl<W: Write> XmlWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn write_header(&mut self) -> std::io::Result<()> {
        writeln!(self.inner, "<?xml version='1.0' encoding='UTF-8'?>")?;
        writeln!(
            self.inner,
            "<osm version=\"0.6\" generator=\"{}\" upload=\"false\">",
            WRITING_PROGRAM
        )
    }

    pub fn write_node(&mut self, node: &Node) -> std::io::Result<()> {
        write!(
            self.inner,
            "  <node id=\"{}\" version=\"{}\" timestamp=\"{}\" changeset=\"{}\" uid=\"{}\" user=\"{}\" lat=\"{:.7}\" lon=\"{:.7}\"",
            node.id(),
            node.version(),
            XML_TIMESTAMP,
            node.changeset(),
            node.uid(),
            escape_xml(node.user()),
            node.coordinate().lat(),
            node.coordinate().lon(),
        )?;
        if node.tags().is_empty() {
            return writeln!(self.inner, "/>");
        }
        writeln!(self.inner, ">")?;
        self.write_tags(node.tags())?;
        writeln!(self.inner, "  </node>")
    }

    pub fn write_way(&mut self, way: &Way) -> std::io::Result<()> {
        writeln!(
            self.inner,
            "  <way id=\"{}\" version=\"{}\" timestamp=\"{}\" changeset=\"{}\" uid=\"{}\" user=\"{}\">",
            way.id(),
            way.version(),
            XML_TIMESTAMP,
            way.changeset(),
            way.uid(),
            escape_xml(way.user()),
        )?;
        for node_id in way.refs() {
            writeln!(self.inner, "    <nd ref=\"{}\"/>", node_id)?;
        }
        self.write_tags(way.tags())?;
        writeln!(self.inner, "  </way>")
    }

    pub fn write_relation(&mut self, relation: &Relation) -> std::io::Result<()> {
        writeln!(
            self.inner,
            "  <relation id=\"{}\" version=\"{}\" timestamp=\"{}\" changeset=\"{}\" uid=\"{}\" user=\"{}\">",
            relation.id(),
            relation.version(),
            XML_TIMESTAMP,
            relation.changeset(),
            relation.uid(),
            escape_xml(relation.user()),
        )?;
        for member in relation.members() {
            let (member_type, member_data) = match member {
                Member::Node { member } => ("node", member),
                Member::Way { member } => ("way", member),
                Member::Relation { member } => ("relation", member),
            };
            writeln!(
                self.inner,
                "    <member type=\"{}\" ref=\"{}\" role=\"{}\"/>",
                member_type,
                member_data.id(),
                escape_xml(member_data.role()),
            )?;
        }
        self.write_tags(relation.tags())?;
        writeln!(self.inner, "  </relation>")
    }

    fn write_tags(&mut self, tags: &[Tag]) -> std::io::Result<()> {
        for tag in tags {
            writeln!(
                self.inner,
                "    <tag k=\"{}\" v=\"{}\"/>",
                escape_xml(tag.k()),
                escape_xml(tag.v())
            )?;
        }
        Ok(())
    }

    pub fn finish(&mut self) -> std::io::Result<()> {
        writeln!(self.inner, "</osm>")?;
        self.inner.flush()
    }
}

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Location;
    use crate::tags::tag;

    fn small_context() -> RunContext {
        let mut ctx = RunContext::new();
        let a = ctx.endpoint_node(Location::new(8.6821270, 50.1109220));
        let b = ctx.endpoint_node(Location::new(8.6831270, 50.1119220));
        let way = ctx.build_way(vec![a, b], vec![tag("highway", "residential"), tag("name", "A & B <Road>")]);
        ctx.build_relation(
            vec![
                osm_io::osm::model::relation::Member::Way {
                    member: osm_io::osm::model::relation::MemberData::new(way, "outer".to_string()),
                },
            ],
            vec![tag("type", "multipolygon")],
        );
        ctx
    }

    #[test]
    fn format_selection_by_suffix() {
        assert_eq!(output_format(Path::new("out.osm")).unwrap(), OutputFormat::Xml);
        assert_eq!(output_format(Path::new("out.OSM")).unwrap(), OutputFormat::Xml);
        assert_eq!(output_format(Path::new("out.pbf")).unwrap(), OutputFormat::Pbf);
        assert!(output_format(Path::new("out.txt")).is_err());
        assert!(output_format(Path::new("out")).is_err());
    }

    #[test]
    fn xml_phases_and_escaping() {
        let ctx = small_context();
        let mut buf: Vec<u8> = Vec::new();
        {
            let mut writer = XmlWriter::new(&mut buf);
            writer.write_header().unwrap();
            for node in &ctx.nodes {
                writer.write_node(node).unwrap();
            }
            for way in &ctx.ways {
                writer.write_way(way).unwrap();
            }
            for relation in &ctx.relations {
                writer.write_relation(relation).unwrap();
            }
            writer.finish().unwrap();
        }
        let xml = String::from_utf8(buf).unwrap();
        assert!(xml.starts_with("<?xml version='1.0' encoding='UTF-8'?>"));
        assert!(xml.contains("lat=\"50.1109220\""));
        assert!(xml.contains("lon=\"8.6821270\""));
        assert!(xml.contains("v=\"A &amp; B &lt;Road&gt;\""));
        assert!(xml.contains("<member type=\"way\" ref=\"3\" role=\"outer\"/>"));
        assert!(xml.contains("version=\"1\""));
        assert!(xml.contains("user=\"import\""));
        // nodes before ways before relations
        let node_pos = xml.find("<node").unwrap();
        let way_pos = xml.find("<way").unwrap();
        let rel_pos = xml.find("<relation").unwrap();
        assert!(node_pos < way_pos && way_pos < rel_pos);
        assert!(xml.trim_end().ends_with("</osm>"));
    }

    #[test]
    fn xml_written_twice_is_identical() {
        let ctx = small_context();
        let render = || {
            let mut buf: Vec<u8> = Vec::new();
            let mut writer = XmlWriter::new(&mut buf);
            writer.write_header().unwrap();
            for node in &ctx.nodes {
                writer.write_node(node).unwrap();
            }
            writer.finish().unwrap();
            buf
        };
        assert_eq!(render(), render());
    }

    #[test]
    fn xml_file_round_trip() {
        let ctx = small_context();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.osm");
        write_output(&ctx, &path).unwrap();
        let xml = std::fs::read_to_string(&path).unwrap();
        assert!(xml.contains("<node id=\"1\""));
        assert!(xml.contains("</osm>"));
    }
}
