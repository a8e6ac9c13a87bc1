use std::collections::HashSet;
use std::path::PathBuf;

use geo::{Coord, LineString};

use comm2osm::boundaries;
use comm2osm::context::RunContext;
use comm2osm::geometry::Location;
use comm2osm::interpolation;
use comm2osm::io::StreetRecord;
use comm2osm::output;
use comm2osm::streets::StreetGraphBuilder;
use comm2osm::tags::{tag, SideTables, TagTranslator};
use comm2osm::zlevels::ZLevelMap;

fn street(link_id: u64, name: &str) -> StreetRecord {
    StreetRecord {
        link_id,
        st_name: name.to_string(),
        func_class: "4".to_string(),
        dir_travel: "B".to_string(),
        pub_access: true,
        ar_through_traffic: true,
        ..StreetRecord::default()
    }
}

fn translator() -> TagTranslator {
    TagTranslator::new(SideTables::default(), PathBuf::from("data/ISO-639-2_utf-8.txt"))
}

/// A small network: a plain street ending at a junction, a bridge ramp
/// ending above that junction at z-level 1, a link that is split by
/// z-levels, and a street with address ranges.
fn build_network(ctx: &mut RunContext) {
    let plain = LineString(vec![
        Coord { x: 8.000, y: 50.000 },
        Coord { x: 8.001, y: 50.000 },
    ]);
    // ends on the same coordinate as `plain`, one level up
    let bridge = LineString(vec![
        Coord { x: 8.001, y: 49.999 },
        Coord { x: 8.001, y: 50.000 },
    ]);
    // elevated at both ends, at grade in the middle
    let ramp = LineString(vec![
        Coord { x: 8.005, y: 50.000 },
        Coord { x: 8.006, y: 50.000 },
        Coord { x: 8.007, y: 50.000 },
        Coord { x: 8.008, y: 50.000 },
    ]);
    let mut addressed = street(3, "BAKER STREET");
    addressed.addr_type = "B".to_string();
    addressed.l_refaddr = "2".to_string();
    addressed.l_nrefaddr = "20".to_string();
    addressed.l_addrsch = "E".to_string();
    let addressed_ls = LineString(vec![
        Coord { x: 8.010, y: 50.010 },
        Coord { x: 8.020, y: 50.010 },
    ]);

    let mut z_level_map = ZLevelMap::default();
    z_level_map.insert(4, vec![(1, 1)]);
    z_level_map.insert(2, vec![(0, 1), (3, 1)]);

    let streets = vec![
        (plain, street(1, "MAIN STREET")),
        (ramp, street(2, "HIGH RAMP")),
        (addressed_ls, addressed),
        (bridge, street(4, "BRIDGE APPROACH")),
    ];

    let translator = translator();
    let mut builder = StreetGraphBuilder::new(ctx, &translator, &z_level_map);
    builder.process_way_end_nodes(&streets);
    builder.process_ways(&streets).unwrap();
}

fn build_admin_ring(ctx: &mut RunContext) {
    let ring = LineString(vec![
        Coord { x: 7.0, y: 49.0 },
        Coord { x: 9.0, y: 49.0 },
        Coord { x: 9.0, y: 51.0 },
        Coord { x: 7.0, y: 51.0 },
        Coord { x: 7.0, y: 49.0 },
    ]);
    let outer = boundaries::build_closed_ways(ctx, &ring).unwrap();
    boundaries::build_multipolygon_relation(
        ctx,
        &outer,
        &[],
        vec![tag("type", "multipolygon"), tag("boundary", "administrative")],
    );
}

#[test]
fn ids_are_unique_across_all_kinds() {
    let mut ctx = RunContext::new();
    build_network(&mut ctx);
    build_admin_ring(&mut ctx);

    let mut seen: HashSet<i64> = HashSet::new();
    for node in &ctx.nodes {
        assert!(seen.insert(node.id()), "duplicate id {}", node.id());
    }
    for way in &ctx.ways {
        assert!(seen.insert(way.id()), "duplicate id {}", way.id());
    }
    for relation in &ctx.relations {
        assert!(seen.insert(relation.id()), "duplicate id {}", relation.id());
    }
}

#[test]
fn every_way_reference_resolves_to_a_node() {
    let mut ctx = RunContext::new();
    build_network(&mut ctx);
    build_admin_ring(&mut ctx);

    let node_ids: HashSet<i64> = ctx.nodes.iter().map(|n| n.id()).collect();
    for way in &ctx.ways {
        assert!(way.refs().len() >= 2);
        assert!(way.refs().len() <= 1000);
        for r in way.refs() {
            assert!(node_ids.contains(r), "way {} references missing node {}", way.id(), r);
        }
    }
}

#[test]
fn bridge_and_street_do_not_share_the_junction_node() {
    let mut ctx = RunContext::new();
    build_network(&mut ctx);

    // the plain street ends at (8.001, 50.000) at grade, the bridge
    // approach ends there one level up: two stacked nodes
    let junction = Location::new(8.001, 50.000);
    let nodes_at_junction: Vec<i64> = ctx
        .nodes
        .iter()
        .filter(|n| Location::new(n.coordinate().lon(), n.coordinate().lat()) == junction)
        .map(|n| n.id())
        .collect();
    assert_eq!(nodes_at_junction.len(), 2);
    assert_ne!(nodes_at_junction[0], nodes_at_junction[1]);

    // both are referenced by exactly one street way each
    let plain_way = ctx.link_id_map.get_vec(&1).unwrap()[0];
    let bridge_way = ctx.link_id_map.get_vec(&4).unwrap()[0];
    let plain_end = *ctx.way(plain_way).unwrap().refs().last().unwrap();
    let bridge_end = *ctx.way(bridge_way).unwrap().refs().last().unwrap();
    assert_ne!(plain_end, bridge_end);
    assert!(nodes_at_junction.contains(&plain_end));
    assert!(nodes_at_junction.contains(&bridge_end));
}

#[test]
fn link_id_map_matches_emitted_ways() {
    let mut ctx = RunContext::new();
    build_network(&mut ctx);

    // link 2 was split by the bridge deck; its entry lists the sub-ways in
    // emission order
    let ways_of_link_2 = ctx.link_id_map.get_vec(&2).unwrap().clone();
    assert!(ways_of_link_2.len() > 1);
    assert!(ways_of_link_2.windows(2).all(|w| w[0] < w[1]));
    for way_id in &ways_of_link_2 {
        let way = ctx.way(*way_id).unwrap();
        assert!(way.tags().iter().any(|t| t.k() == "LINK_ID" && t.v() == "2"));
    }

    // consecutive sub-ways share their boundary node
    for pair in ways_of_link_2.windows(2) {
        let first = ctx.way(pair[0]).unwrap();
        let second = ctx.way(pair[1]).unwrap();
        assert_eq!(first.refs().last(), second.refs().first());
    }
}

#[test]
fn interpolation_ways_are_not_linked_to_streets() {
    let mut ctx = RunContext::new();
    build_network(&mut ctx);

    let linked: HashSet<i64> = ctx
        .link_id_map
        .iter_all()
        .flat_map(|(_, ways)| ways.iter().copied())
        .collect();
    let interpolation_ways: Vec<_> = ctx
        .ways
        .iter()
        .filter(|w| w.tags().iter().any(|t| t.k() == "addr:interpolation"))
        .collect();
    assert_eq!(interpolation_ways.len(), 1);
    for way in interpolation_ways {
        assert!(!linked.contains(&way.id()));
    }
}

#[test]
fn standalone_interpolation_way_carries_street_name() {
    let mut ctx = RunContext::new();
    let mut s = street(9, "ELM STREET");
    s.addr_type = "B".to_string();
    s.r_refaddr = "1".to_string();
    s.r_nrefaddr = "11".to_string();
    s.r_addrsch = "O".to_string();
    let ls = LineString(vec![
        Coord { x: 0.0, y: 0.0 },
        Coord { x: 0.01, y: 0.0 },
    ]);
    interpolation::create_house_numbers(&mut ctx, &s, &ls);
    assert_eq!(ctx.ways.len(), 1);
    let way = &ctx.ways[0];
    assert!(way.tags().iter().any(|t| t.k() == "addr:interpolation" && t.v() == "odd"));
    assert!(way.tags().iter().any(|t| t.k() == "addr:street" && t.v() == "Elm Street"));
}

#[test]
fn xml_output_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let render = |name: &str| {
        let mut ctx = RunContext::new();
        build_network(&mut ctx);
        build_admin_ring(&mut ctx);
        let path = dir.path().join(name);
        output::write_output(&ctx, &path).unwrap();
        std::fs::read(path).unwrap()
    };
    assert_eq!(render("a.osm"), render("b.osm"));
}

#[test]
fn xml_output_contains_all_phases_in_order() {
    let mut ctx = RunContext::new();
    build_network(&mut ctx);
    build_admin_ring(&mut ctx);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.osm");
    output::write_output(&ctx, &path).unwrap();
    let xml = std::fs::read_to_string(&path).unwrap();

    assert!(xml.contains("layer"));
    assert!(xml.contains("addr:interpolation"));
    assert!(xml.contains("boundary"));
    let last_node = xml.rfind("<node").unwrap();
    let first_way = xml.find("<way").unwrap();
    let last_way = xml.rfind("<way").unwrap();
    let first_rel = xml.find("<relation").unwrap();
    assert!(last_node < first_way);
    assert!(last_way < first_rel);
}
