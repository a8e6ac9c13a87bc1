use std::collections::BTreeMap;
use std::path::Path;

use geo::{LineString, MultiPolygon, Polygon};
use log::warn;
use osm_io::osm::model::relation::{Member, MemberData};
use osm_io::osm::model::tag::Tag;
use shapefile::dbase::Record;

use crate::context::{NodeId, RelId, RunContext, WayId};
use crate::error::{ConvertError, Result};
use crate::geometry::{Geometry, Location};
use crate::io::{self, string_field, u64_field, MtdAreaRow};
use crate::tags::{self, tag, to_camel_case_with_spaces, TagTranslator};

/// Longest node sequence a way may carry.
pub const OSM_MAX_WAY_NODES: usize = 1000;

/// Merged `MtdArea.dbf` rows for one administrative area.
#[derive(Debug, Clone)]
pub struct MtdArea {
    pub area_id: u64,
    pub admin_lvl: Option<u64>,
    pub area_code_1: u64,
    pub govt_code: u64,
    /// language code (as delivered) and camel-cased area name
    pub names: Vec<(String, String)>,
}

pub type MtdAreaMap = BTreeMap<u64, MtdArea>;

/// Merges the `MtdArea.dbf` rows of one directory into `areas`. An area id
/// must carry a single admin level; conflicting rows are logged and the
/// first level wins.
pub fn read_mtd_areas(path: &Path, areas: &mut MtdAreaMap) -> Result<()> {
    for row in io::read_dbf_rows(path, MtdAreaRow::from_record)? {
        merge_mtd_area_row(areas, &row);
    }
    Ok(())
}

pub(crate) fn merge_mtd_area_row(areas: &mut MtdAreaMap, row: &MtdAreaRow) {
    let entry = areas.entry(row.area_id).or_insert_with(|| MtdArea {
        area_id: row.area_id,
        admin_lvl: None,
        area_code_1: row.area_code_1,
        govt_code: row.govt_code,
        names: Vec::new(),
    });
    if row.admin_lvl != 0 {
        match entry.admin_lvl {
            None => entry.admin_lvl = Some(row.admin_lvl),
            Some(existing) if existing != row.admin_lvl => warn!(
                "entry with area_id={} has multiple admin_lvls: {}, {}",
                row.area_id, existing, row.admin_lvl
            ),
            Some(_) => {}
        }
    }
    if entry.govt_code == 0 {
        entry.govt_code = row.govt_code;
    }
    if !row.area_name.is_empty() {
        entry
            .names
            .push((row.lang_code.clone(), to_camel_case_with_spaces(&row.area_name)));
    }
}

/// Splits a node sequence into consecutive ways of at most 1000 nodes, each
/// chunk sharing its first node with the previous chunk's last.
fn build_chunked_ways(ctx: &mut RunContext, node_ids: &[NodeId], way_tags: &[Tag]) -> Vec<WayId> {
    let mut way_ids = Vec::new();
    let mut i = 0;
    loop {
        let end = (i + OSM_MAX_WAY_NODES).min(node_ids.len());
        way_ids.push(ctx.build_way(node_ids[i..end].to_vec(), way_tags.to_vec()));
        if end == node_ids.len() {
            break;
        }
        i = end - 1;
    }
    way_ids
}

/// Turns one ring into closed, chunked ways. Every ring vertex gets a fresh
/// node; boundaries do not share nodes with the street graph. The ring is
/// closed by reusing the first node as the last reference.
pub fn build_closed_ways(ctx: &mut RunContext, ring: &LineString<f64>) -> Result<Vec<WayId>> {
    let coords = &ring.0;
    if coords.len() < 4 {
        return Err(ConvertError::GeometryMismatch {
            expected: "ring with at least four vertices",
            found: format!("ring with {} vertices", coords.len()),
        });
    }
    let first = Location::from_coord(&coords[0]);
    let last = Location::from_coord(&coords[coords.len() - 1]);
    if first != last {
        return Err(ConvertError::Topology(
            "boundary ring is invalid, first and last vertex differ".to_string(),
        ));
    }

    let mut node_ids: Vec<NodeId> = Vec::with_capacity(coords.len());
    for c in &coords[..coords.len() - 1] {
        node_ids.push(ctx.build_node(Location::from_coord(c)));
    }
    node_ids.push(node_ids[0]);
    Ok(build_chunked_ways(ctx, &node_ids, &[]))
}

pub fn build_multipolygon_relation(
    ctx: &mut RunContext,
    outer_ways: &[WayId],
    inner_ways: &[WayId],
    rel_tags: Vec<Tag>,
) -> RelId {
    let mut members = Vec::with_capacity(outer_ways.len() + inner_ways.len());
    for &way_id in outer_ways {
        members.push(Member::Way { member: MemberData::new(way_id, "outer".to_string()) });
    }
    for &way_id in inner_ways {
        members.push(Member::Way { member: MemberData::new(way_id, "inner".to_string()) });
    }
    ctx.build_relation(members, rel_tags)
}

/// Outer and inner ring ways for a polygonal feature.
fn build_polygon_ways(
    ctx: &mut RunContext,
    geometry: &Geometry,
) -> Result<(Vec<WayId>, Vec<WayId>)> {
    let mut outer = Vec::new();
    let mut inner = Vec::new();
    match geometry {
        Geometry::Polygon(polygon) => {
            collect_polygon_ways(ctx, polygon, &mut outer, &mut inner)?;
        }
        Geometry::MultiPolygon(MultiPolygon(polygons)) => {
            for polygon in polygons {
                collect_polygon_ways(ctx, polygon, &mut outer, &mut inner)?;
            }
        }
        other => {
            return Err(ConvertError::GeometryMismatch {
                expected: "polygon or multipolygon",
                found: other.type_name().to_string(),
            })
        }
    }
    Ok((outer, inner))
}

fn collect_polygon_ways(
    ctx: &mut RunContext,
    polygon: &Polygon<f64>,
    outer: &mut Vec<WayId>,
    inner: &mut Vec<WayId>,
) -> Result<()> {
    outer.extend(build_closed_ways(ctx, polygon.exterior())?);
    for ring in polygon.interiors() {
        inner.extend(build_closed_ways(ctx, ring)?);
    }
    Ok(())
}

/* administrative boundaries */

pub fn add_admin_boundaries(
    ctx: &mut RunContext,
    dir: &Path,
    translator: &TagTranslator,
    areas: &MtdAreaMap,
) -> Result<()> {
    for name in io::ADMINBNDY_SHPS {
        if !io::file_exists(dir, name) {
            continue;
        }
        let path = dir.join(name);
        for (geometry, record) in io::read_features(&path)? {
            match process_admin_boundary(ctx, translator, areas, &geometry, &record) {
                Ok(()) => {}
                Err(e) if e.is_run_fatal() => return Err(e),
                Err(e) => warn!("{}: skipping admin boundary: {}", path.display(), e),
            }
        }
    }
    Ok(())
}

fn process_admin_boundary(
    ctx: &mut RunContext,
    translator: &TagTranslator,
    areas: &MtdAreaMap,
    geometry: &Geometry,
    record: &Record,
) -> Result<()> {
    let area_id = u64_field(record, "Adminbndy", "AREA_ID")?;
    let (outer, inner) = build_polygon_ways(ctx, geometry)?;

    let mut rel_tags = vec![tag("type", "multipolygon"), tag("boundary", "administrative")];
    match areas.get(&area_id) {
        Some(area) => {
            if let Some(admin_lvl) = area.admin_lvl {
                rel_tags.push(tag("navteq_admin_level", &admin_lvl.to_string()));
                match tags::osm_admin_level(admin_lvl) {
                    Some(osm_lvl) => rel_tags.push(tag("admin_level", &osm_lvl)),
                    None => warn!(
                        "area {}: admin level {} out of range, skipping admin_level tag",
                        area_id, admin_lvl
                    ),
                }
            }
            for (lang_code, area_name) in &area.names {
                rel_tags
                    .push(tag(&format!("name:{}", translator.lang_code(lang_code)), area_name));
            }
        }
        None => warn!("skipping tags of unknown area {}", area_id),
    }

    build_multipolygon_relation(ctx, &outer, &inner, rel_tags);
    Ok(())
}

/* water */

pub fn add_water(ctx: &mut RunContext, dir: &Path) -> Result<()> {
    for name in [io::WATER_POLY_SHP, io::WATER_SEG_SHP] {
        if !io::file_exists(dir, name) {
            continue;
        }
        let path = dir.join(name);
        for (geometry, record) in io::read_features(&path)? {
            match process_water_feature(ctx, &geometry, &record) {
                Ok(()) => {}
                Err(e) if e.is_run_fatal() => return Err(e),
                Err(e) => warn!("{}: skipping water feature: {}", path.display(), e),
            }
        }
    }
    Ok(())
}

fn process_water_feature(
    ctx: &mut RunContext,
    geometry: &Geometry,
    record: &Record,
) -> Result<()> {
    let feat_cod = io::opt_u64_field(record, "Water", "FEAT_COD")?.unwrap_or(0);
    let name = string_field(record, "Water", "POLYGON_NM").unwrap_or_default();
    match geometry {
        Geometry::LineString(ls) => {
            let node_ids: Vec<NodeId> = ls
                .0
                .iter()
                .map(|c| ctx.build_node(Location::from_coord(c)))
                .collect();
            build_chunked_ways(ctx, &node_ids, &tags::water_seg_tags(feat_cod, &name));
            Ok(())
        }
        Geometry::Polygon(_) | Geometry::MultiPolygon(_) => {
            let (outer, inner) = build_polygon_ways(ctx, geometry)?;
            build_multipolygon_relation(ctx, &outer, &inner, tags::water_poly_tags(feat_cod, &name));
            Ok(())
        }
        other => Err(ConvertError::GeometryMismatch {
            expected: "linestring, polygon or multipolygon",
            found: other.type_name().to_string(),
        }),
    }
}

/* land use */

pub fn add_landuse(ctx: &mut RunContext, dir: &Path) -> Result<()> {
    for name in [io::LAND_USE_A_SHP, io::LAND_USE_B_SHP] {
        if !io::file_exists(dir, name) {
            continue;
        }
        let path = dir.join(name);
        for (geometry, record) in io::read_features(&path)? {
            match process_landuse_feature(ctx, &geometry, &record) {
                Ok(()) => {}
                Err(e) if e.is_run_fatal() => return Err(e),
                Err(e) => warn!("{}: skipping land use feature: {}", path.display(), e),
            }
        }
    }
    Ok(())
}

fn process_landuse_feature(
    ctx: &mut RunContext,
    geometry: &Geometry,
    record: &Record,
) -> Result<()> {
    let feat_cod = io::opt_u64_field(record, "LandUse", "FEAT_COD")?.unwrap_or(0);
    let vocabulary = match tags::landuse_tags(feat_cod) {
        Some(vocabulary) => vocabulary,
        None => {
            warn!("unknown land use feature code {}", feat_cod);
            return Ok(());
        }
    };
    let (outer, inner) = build_polygon_ways(ctx, geometry)?;
    let mut rel_tags = vec![tag("type", "multipolygon")];
    for (k, v) in vocabulary {
        rel_tags.push(tag(k, v));
    }
    let name = string_field(record, "LandUse", "POLYGON_NM").unwrap_or_default();
    if !name.is_empty() {
        rel_tags.push(tag("name", &to_camel_case_with_spaces(&name)));
    }
    build_multipolygon_relation(ctx, &outer, &inner, rel_tags);
    Ok(())
}
