use geo::LineString;
use log::warn;
use osm_io::osm::model::tag::Tag;
use rustc_hash::FxHashMap;

use crate::context::{LinkId, NodeId, RunContext, WayId};
use crate::error::{ConvertError, Result};
use crate::geometry::Location;
use crate::interpolation;
use crate::io::StreetRecord;
use crate::tags::{self, TagTranslator};
use crate::zlevels::{set_ferry_z_lvls_to_zero, IndexZLvl, ZLevelMap};

/// Materialises nodes and ways from street linestrings.
///
/// Endpoints are interned through the run context, one node per location at
/// grade and one per location and z-level above or below it. Interior
/// vertices get fresh nodes per link, shared between all sub-ways cut from
/// that link so the pieces meet in a common node.
pub struct StreetGraphBuilder<'a> {
    ctx: &'a mut RunContext,
    translator: &'a TagTranslator,
    z_level_map: &'a ZLevelMap,
}

impl<'a> StreetGraphBuilder<'a> {
    pub fn new(
        ctx: &'a mut RunContext,
        translator: &'a TagTranslator,
        z_level_map: &'a ZLevelMap,
    ) -> Self {
        Self { ctx, translator, z_level_map }
    }

    /// First pass: interns the endpoints of every link without z-level rows,
    /// so crossings exist before any way references them. Links with
    /// z-levels are handled during the way pass, their endpoints may need
    /// stacking.
    pub fn process_way_end_nodes(&mut self, streets: &[(LineString<f64>, StreetRecord)]) {
        for (ls, street) in streets {
            if self.z_level_map.contains_key(&street.link_id) {
                continue;
            }
            if let (Some(first), Some(last)) = (ls.0.first(), ls.0.last()) {
                self.ctx.endpoint_node(Location::from_coord(first));
                self.ctx.endpoint_node(Location::from_coord(last));
            }
        }
    }

    /// Second pass: emits the ways. Feature-level failures are logged and
    /// skipped, run-fatal errors abort.
    pub fn process_ways(&mut self, streets: &[(LineString<f64>, StreetRecord)]) -> Result<()> {
        for (ls, street) in streets {
            match self.process_way(ls, street) {
                Ok(()) => {}
                Err(e) if e.is_run_fatal() => return Err(e),
                Err(e) => warn!("skipping street with link id {}: {}", street.link_id, e),
            }
        }
        Ok(())
    }

    fn process_way(&mut self, ls: &LineString<f64>, street: &StreetRecord) -> Result<()> {
        if ls.0.len() < 2 {
            return Err(ConvertError::GeometryMismatch {
                expected: "linestring with at least two vertices",
                found: format!("{} vertices", ls.0.len()),
            });
        }

        // fresh nodes for the interior vertices, shared by all sub-ways
        let mut node_ref_map: FxHashMap<Location, NodeId> = FxHashMap::default();
        for c in &ls.0[1..ls.0.len() - 1] {
            let loc = Location::from_coord(c);
            if !node_ref_map.contains_key(&loc) {
                let id = self.ctx.build_node(loc);
                node_ref_map.insert(loc, id);
            }
        }

        let (observed_link_id, base_tags) = self.translator.street_tags(street)?;
        debug_assert_eq!(observed_link_id, street.link_id);

        match self.z_level_map.get(&street.link_id) {
            None => {
                let mut refs = Vec::with_capacity(ls.0.len());
                for (i, c) in ls.0.iter().enumerate() {
                    let loc = Location::from_coord(c);
                    if i == 0 || i == ls.0.len() - 1 {
                        refs.push(self.ctx.endpoint_node(loc));
                    } else {
                        refs.push(node_ref_map[&loc]);
                    }
                }
                self.commit_street_way(street.link_id, refs, &base_tags, 0);
            }
            Some(z_entries) => {
                let last_index = ls.0.len() - 1;
                let z_first = match z_entries.first() {
                    Some(&(i, z)) if i == 0 => z,
                    _ => 0,
                };
                let z_last = match z_entries.last() {
                    Some(&(i, z)) if i == last_index => z,
                    _ => 0,
                };
                self.process_end_point(ls, true, z_first, &mut node_ref_map);
                self.process_end_point(ls, false, z_last, &mut node_ref_map);

                let mut entries = z_entries.clone();
                if tags::is_ferry(&street.ferry_type)? {
                    set_ferry_z_lvls_to_zero(&mut entries, last_index);
                }
                if entries.is_empty() {
                    self.build_sub_way(street.link_id, ls, 0, last_index, 0, &node_ref_map, &base_tags)?;
                } else {
                    self.split_way_by_z_level(street.link_id, ls, &entries, &node_ref_map, &base_tags)?;
                }
            }
        }

        if street.addr_type == "B" {
            interpolation::create_house_numbers(self.ctx, street, ls);
        }
        Ok(())
    }

    /// Resolves one endpoint of a z-levelled link. A non-zero level interns
    /// the node by location plus level and records it in the per-link map,
    /// level zero falls back to the plain endpoint interner.
    fn process_end_point(
        &mut self,
        ls: &LineString<f64>,
        first: bool,
        z_lvl: i8,
        node_ref_map: &mut FxHashMap<Location, NodeId>,
    ) {
        let i = if first { 0 } else { ls.0.len() - 1 };
        let location = Location::from_coord(&ls.0[i]);
        if z_lvl != 0 {
            let id = self.ctx.zlvl_node(location, z_lvl);
            node_ref_map.entry(location).or_insert(id);
        } else {
            self.ctx.endpoint_node(location);
        }
    }

    /// Splitting proper. `entries` holds the non-zero z-levels sorted by
    /// vertex index; omitted indices are at level zero. The vertex before
    /// the first marked vertex already sits on the ramp, so the leading
    /// zero range ends there.
    fn split_way_by_z_level(
        &mut self,
        link_id: LinkId,
        ls: &LineString<f64>,
        entries: &[IndexZLvl],
        node_ref_map: &FxHashMap<Location, NodeId>,
        base_tags: &[Tag],
    ) -> Result<()> {
        let first_index = 0usize;
        let last_index = ls.0.len() - 1;

        for pair in entries.windows(2) {
            if pair[1].0 <= pair[0].0 {
                return Err(ConvertError::Topology(format!(
                    "z-level rows for link {} are not sorted by vertex index",
                    link_id
                )));
            }
        }
        if entries[entries.len() - 1].0 > last_index {
            return Err(ConvertError::Topology(format!(
                "z-level row for link {} references vertex {} beyond the last vertex {}",
                link_id,
                entries[entries.len() - 1].0,
                last_index
            )));
        }

        let mut start_index = entries[0].0;
        if start_index > 0 {
            start_index -= 1;
        }

        if first_index < start_index {
            self.build_sub_way(link_id, ls, first_index, start_index, 0, node_ref_map, base_tags)?;
        }

        start_index = self.create_continuing_sub_ways(
            link_id,
            ls,
            start_index,
            last_index,
            entries,
            node_ref_map,
            base_tags,
        )?;

        if start_index < last_index {
            self.build_sub_way(link_id, ls, start_index, last_index, 0, node_ref_map, base_tags)?;
        }
        Ok(())
    }

    /// Walks the z-level markers left to right and closes a sub-way at every
    /// level change or gap. Adjacent markers of equal level two vertices
    /// apart keep one range open; a dominated marker between two equal
    /// superior levels is smoothed away. At a level change the vertex
    /// boundary goes to the superior level.
    #[allow(clippy::too_many_arguments)]
    fn create_continuing_sub_ways(
        &mut self,
        link_id: LinkId,
        ls: &LineString<f64>,
        mut start_index: usize,
        last_index: usize,
        entries: &[IndexZLvl],
        node_ref_map: &FxHashMap<Location, NodeId>,
        base_tags: &[Tag],
    ) -> Result<usize> {
        let mut i = 0;
        while i < entries.len() {
            let (index, z_lvl) = entries[i];
            let next = entries.get(i + 1).copied();

            if let Some((next_index, next_z_lvl)) = next {
                if index + 2 == next_index && z_lvl == next_z_lvl {
                    i += 1;
                    continue;
                }
                if let Some(&(second_next_index, second_next_z_lvl)) = entries.get(i + 2) {
                    if index + 2 == second_next_index
                        && is_superior_or_equal(second_next_z_lvl, next_z_lvl)
                        && z_lvl == second_next_z_lvl
                    {
                        i += 2;
                        continue;
                    }
                }
            }

            let close = match next {
                None => true,
                Some((next_index, next_z_lvl)) => index + 1 < next_index || z_lvl != next_z_lvl,
            };
            if close {
                let to = match next {
                    None => (index + 1).min(last_index),
                    Some((next_index, next_z_lvl)) => {
                        if index + 1 < next_index || is_superior(z_lvl, next_z_lvl) {
                            (index + 1).min(last_index)
                        } else {
                            index
                        }
                    }
                };
                if start_index < to {
                    self.build_sub_way(link_id, ls, start_index, to, z_lvl, node_ref_map, base_tags)?;
                    start_index = to;
                }
                if let Some((next_index, _)) = next {
                    if to + 1 < next_index {
                        self.build_sub_way(link_id, ls, to, next_index - 1, 0, node_ref_map, base_tags)?;
                        start_index = next_index - 1;
                    }
                }
            }
            i += 1;
        }
        Ok(start_index)
    }

    /// Emits the sub-way for vertex range `[from..=to]`. Node lookup order
    /// is fixed: the per-link map first (interior vertices and stacked
    /// endpoints), then the global endpoint map.
    #[allow(clippy::too_many_arguments)]
    fn build_sub_way(
        &mut self,
        link_id: LinkId,
        ls: &LineString<f64>,
        from: usize,
        to: usize,
        z_lvl: i8,
        node_ref_map: &FxHashMap<Location, NodeId>,
        base_tags: &[Tag],
    ) -> Result<WayId> {
        let mut refs = Vec::with_capacity(to - from + 1);
        for c in &ls.0[from..=to] {
            let loc = Location::from_coord(c);
            let id = node_ref_map
                .get(&loc)
                .or_else(|| self.ctx.way_end_points.get(&loc))
                .copied()
                .ok_or_else(|| {
                    ConvertError::Topology(format!(
                        "no node recorded for a vertex of link {}",
                        link_id
                    ))
                })?;
            refs.push(id);
        }
        Ok(self.commit_street_way(link_id, refs, base_tags, z_lvl))
    }

    fn commit_street_way(
        &mut self,
        link_id: LinkId,
        refs: Vec<NodeId>,
        base_tags: &[Tag],
        z_lvl: i8,
    ) -> WayId {
        let mut way_tags = base_tags.to_vec();
        if z_lvl != 0 {
            way_tags.push(Tag::new("layer".to_string(), z_lvl.to_string()));
        }
        let way_id = self.ctx.build_way(refs, way_tags);
        self.ctx.record_link_way(link_id, way_id);
        way_id
    }
}

/// True if the first z-level dominates the second by absolute value.
fn is_superior(superior: i8, than: i8) -> bool {
    superior.abs() > than.abs()
}

fn is_superior_or_equal(superior: i8, than: i8) -> bool {
    superior.abs() >= than.abs()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use geo::Coord;

    use super::*;
    use crate::tags::SideTables;

    fn line(n: usize) -> LineString<f64> {
        LineString((0..n).map(|i| Coord { x: i as f64 * 0.001, y: 0.0 }).collect())
    }

    fn test_street(link_id: u64) -> StreetRecord {
        StreetRecord {
            link_id,
            st_name: "TEST ROAD".to_string(),
            func_class: "5".to_string(),
            dir_travel: "B".to_string(),
            pub_access: true,
            ar_through_traffic: true,
            ..StreetRecord::default()
        }
    }

    fn translator() -> TagTranslator {
        TagTranslator::new(SideTables::default(), PathBuf::from("data/ISO-639-2_utf-8.txt"))
    }

    fn z_map_for(link_id: u64, z_lvls: &[i8]) -> ZLevelMap {
        let entries: Vec<IndexZLvl> = z_lvls
            .iter()
            .enumerate()
            .filter(|(_, &z)| z != 0)
            .map(|(i, &z)| (i, z))
            .collect();
        let mut map = ZLevelMap::default();
        if !entries.is_empty() {
            map.insert(link_id, entries);
        }
        map
    }

    fn way_z_lvl(ctx: &RunContext, way_index: usize) -> i8 {
        ctx.ways[way_index]
            .tags()
            .iter()
            .find(|t| t.k() == "layer")
            .map(|t| t.v().parse().unwrap())
            .unwrap_or(0)
    }

    /// Runs one linestring with per-vertex z-levels through the builder and
    /// returns the z-level of every emitted way, in emission order.
    fn split(z_lvls: &[i8]) -> Vec<i8> {
        let mut ctx = RunContext::new();
        let translator = translator();
        let z_level_map = z_map_for(1, z_lvls);
        let streets = vec![(line(z_lvls.len()), test_street(1))];
        let mut builder = StreetGraphBuilder::new(&mut ctx, &translator, &z_level_map);
        builder.process_way_end_nodes(&streets);
        builder.process_ways(&streets).unwrap();
        (0..ctx.ways.len()).map(|i| way_z_lvl(&ctx, i)).collect()
    }

    #[test]
    fn split_two_vertices() {
        assert_eq!(split(&[0, 1]), vec![1]);
        assert_eq!(split(&[1, 0]), vec![1]);
        assert_eq!(split(&[1, 1]), vec![1]);
    }

    #[test]
    fn split_three_vertices() {
        assert_eq!(split(&[0, 0, 1]), vec![0, 1]);
        assert_eq!(split(&[0, 1, 0]), vec![1]);
        assert_eq!(split(&[0, 1, 1]), vec![1]);
        assert_eq!(split(&[1, 0, 0]), vec![1, 0]);
        assert_eq!(split(&[1, 0, 1]), vec![1]);
        assert_eq!(split(&[1, 1, 0]), vec![1]);
        assert_eq!(split(&[1, 1, 1]), vec![1]);
    }

    #[test]
    fn split_negative_levels() {
        assert_eq!(split(&[-1, 0, -1]), vec![-1]);
        assert_eq!(split(&[-1, 1, -1]), vec![-1]);
        assert_eq!(split(&[1, -1, 1]), vec![1]);
        assert_eq!(split(&[0, -1, 0]), vec![-1]);
        assert_eq!(split(&[2, 1, 2]), vec![2]);
        assert_eq!(split(&[-2, -1, -2]), vec![-2]);
        assert_eq!(split(&[-2, -1, -3]), vec![-2, -3]);
    }

    #[test]
    fn split_four_vertices() {
        assert_eq!(split(&[0, 0, 0, 1]), vec![0, 1]);
        assert_eq!(split(&[0, 0, 1, 0]), vec![0, 1]);
        assert_eq!(split(&[0, 0, 1, 1]), vec![0, 1]);
        assert_eq!(split(&[0, 1, 0, 0]), vec![1, 0]);
        assert_eq!(split(&[0, 1, 0, 1]), vec![1]);
        assert_eq!(split(&[0, 1, 1, 0]), vec![1]);
        assert_eq!(split(&[0, 1, 1, 1]), vec![1]);
        assert_eq!(split(&[1, 0, 0, 0]), vec![1, 0]);
        assert_eq!(split(&[1, 0, 0, 1]), vec![1, 0, 1]);
        assert_eq!(split(&[1, 0, 1, 0]), vec![1]);
        assert_eq!(split(&[1, 0, 1, 1]), vec![1]);
        assert_eq!(split(&[1, 1, 0, 0]), vec![1, 0]);
        assert_eq!(split(&[1, 1, 0, 1]), vec![1]);
        assert_eq!(split(&[1, 1, 1, 0]), vec![1]);
        assert_eq!(split(&[1, 1, 1, 1]), vec![1]);
        assert_eq!(split(&[1, 2, 2, 1]), vec![2]);
        assert_eq!(split(&[2, 1, 1, 2]), vec![2, 1, 2]);
    }

    #[test]
    fn split_longer_ramps() {
        assert_eq!(split(&[1, 0, 0, 0, 1]), vec![1, 0, 1]);
        assert_eq!(split(&[2, 1, 0, 1, 2]), vec![2, 1, 2]);
        assert_eq!(split(&[2, 1, 0, 0, 1, 2]), vec![2, 1, 0, 1, 2]);
        assert_eq!(split(&[0, 1, 1, 0, 1, 1, 0]), vec![1]);
    }

    #[test]
    fn split_alternating_patterns() {
        assert_eq!(split(&[0, 1, 0, 1, 0, 1, 0, 1]), vec![1]);
        assert_eq!(split(&[0, 1, 1, 0, 0, 1, 0, 0]), vec![1, 0, 1, 0]);
        assert_eq!(split(&[1, 0, 1, 0, 1, 0, 1, 0]), vec![1]);
        assert_eq!(split(&[0, 1, 0, 1, 0, 0, 1, 0, 1]), vec![1, 0, 1]);
    }

    #[test]
    fn split_merges_and_smooths_spikes() {
        assert_eq!(split(&[0, 1, 1, 0, 1, 1, 0, 1, 1, 0]), vec![1]);
        assert_eq!(split(&[0, 4, 4, 0, 0, 0, 5, 5, 0, 0]), vec![4, 0, 5, 0]);
    }

    #[test]
    fn sub_ways_share_interior_boundary_nodes() {
        let mut ctx = RunContext::new();
        let translator = translator();
        let z_level_map = z_map_for(1, &[1, 0, 0, 1]);
        let streets = vec![(line(4), test_street(1))];
        let mut builder = StreetGraphBuilder::new(&mut ctx, &translator, &z_level_map);
        builder.process_way_end_nodes(&streets);
        builder.process_ways(&streets).unwrap();

        assert_eq!(ctx.ways.len(), 3);
        let first = ctx.ways[0].refs().clone();
        let second = ctx.ways[1].refs().clone();
        let third = ctx.ways[2].refs().clone();
        assert_eq!(first.last(), second.first());
        assert_eq!(second.last(), third.first());
    }

    #[test]
    fn link_id_map_preserves_emission_order() {
        let mut ctx = RunContext::new();
        let translator = translator();
        let z_level_map = z_map_for(1, &[1, 0, 0, 1]);
        let streets = vec![(line(4), test_street(1))];
        let mut builder = StreetGraphBuilder::new(&mut ctx, &translator, &z_level_map);
        builder.process_way_end_nodes(&streets);
        builder.process_ways(&streets).unwrap();

        let way_ids: Vec<i64> = ctx.ways.iter().map(|w| w.id()).collect();
        assert_eq!(ctx.link_id_map.get_vec(&1).unwrap(), &way_ids);
        assert!(way_ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn streets_meeting_at_different_z_levels_get_distinct_nodes() {
        let mut ctx = RunContext::new();
        let translator = translator();

        // two links ending on the same coordinate, one at z=1, one at z=2
        let shared = Coord { x: 0.5, y: 0.5 };
        let ls_a = LineString(vec![Coord { x: 0.0, y: 0.5 }, shared]);
        let ls_b = LineString(vec![Coord { x: 1.0, y: 0.5 }, shared]);
        let mut z_level_map = ZLevelMap::default();
        z_level_map.insert(1, vec![(1, 1)]);
        z_level_map.insert(2, vec![(1, 2)]);
        let streets = vec![(ls_a, test_street(1)), (ls_b, test_street(2))];

        let mut builder = StreetGraphBuilder::new(&mut ctx, &translator, &z_level_map);
        builder.process_way_end_nodes(&streets);
        builder.process_ways(&streets).unwrap();

        assert_eq!(ctx.ways.len(), 2);
        let end_a = *ctx.ways[0].refs().last().unwrap();
        let end_b = *ctx.ways[1].refs().last().unwrap();
        assert_ne!(end_a, end_b);
        assert_eq!(
            ctx.location_index.get(&end_a),
            ctx.location_index.get(&end_b)
        );
    }

    #[test]
    fn streets_meeting_at_the_same_z_level_share_a_node() {
        let mut ctx = RunContext::new();
        let translator = translator();

        let shared = Coord { x: 0.5, y: 0.5 };
        let ls_a = LineString(vec![Coord { x: 0.0, y: 0.5 }, shared]);
        let ls_b = LineString(vec![Coord { x: 1.0, y: 0.5 }, shared]);
        let mut z_level_map = ZLevelMap::default();
        z_level_map.insert(1, vec![(1, 1)]);
        z_level_map.insert(2, vec![(1, 1)]);
        let streets = vec![(ls_a, test_street(1)), (ls_b, test_street(2))];

        let mut builder = StreetGraphBuilder::new(&mut ctx, &translator, &z_level_map);
        builder.process_way_end_nodes(&streets);
        builder.process_ways(&streets).unwrap();

        let end_a = *ctx.ways[0].refs().last().unwrap();
        let end_b = *ctx.ways[1].refs().last().unwrap();
        assert_eq!(end_a, end_b);
    }

    #[test]
    fn grade_level_crossing_shares_the_endpoint_node() {
        let mut ctx = RunContext::new();
        let translator = translator();
        let z_level_map = ZLevelMap::default();

        let shared = Coord { x: 0.5, y: 0.5 };
        let ls_a = LineString(vec![Coord { x: 0.0, y: 0.5 }, shared]);
        let ls_b = LineString(vec![Coord { x: 1.0, y: 0.5 }, shared]);
        let streets = vec![(ls_a, test_street(1)), (ls_b, test_street(2))];

        let mut builder = StreetGraphBuilder::new(&mut ctx, &translator, &z_level_map);
        builder.process_way_end_nodes(&streets);
        builder.process_ways(&streets).unwrap();

        let end_a = *ctx.ways[0].refs().last().unwrap();
        let end_b = *ctx.ways[1].refs().last().unwrap();
        assert_eq!(end_a, end_b);
    }

    #[test]
    fn ferry_links_only_keep_endpoint_levels() {
        let mut ctx = RunContext::new();
        let translator = translator();
        // mid-link stacking on a ferry is dropped before splitting
        let mut z_level_map = ZLevelMap::default();
        z_level_map.insert(1, vec![(1, 1), (2, 1)]);
        let mut street = test_street(1);
        street.ferry_type = "B".to_string();
        let streets = vec![(line(4), street)];
        let mut builder = StreetGraphBuilder::new(&mut ctx, &translator, &z_level_map);
        builder.process_way_end_nodes(&streets);
        builder.process_ways(&streets).unwrap();

        assert_eq!(ctx.ways.len(), 1);
        assert_eq!(way_z_lvl(&ctx, 0), 0);
        assert_eq!(ctx.ways[0].refs().len(), 4);
    }

    #[test]
    fn every_way_carries_the_translator_tags() {
        let mut ctx = RunContext::new();
        let translator = translator();
        let z_level_map = z_map_for(1, &[1, 0, 0, 1]);
        let streets = vec![(line(4), test_street(1))];
        let mut builder = StreetGraphBuilder::new(&mut ctx, &translator, &z_level_map);
        builder.process_way_end_nodes(&streets);
        builder.process_ways(&streets).unwrap();

        for way in &ctx.ways {
            assert!(way.tags().iter().any(|t| t.k() == "LINK_ID" && t.v() == "1"));
            assert!(way.tags().iter().any(|t| t.k() == "highway"));
        }
        // layer only on the stacked pieces
        assert!(ctx.ways[0].tags().iter().any(|t| t.k() == "layer" && t.v() == "1"));
        assert!(!ctx.ways[1].tags().iter().any(|t| t.k() == "layer"));
    }
}
