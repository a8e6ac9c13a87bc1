use multimap::MultiMap;
use osm_io::osm::model::node::Node;
use osm_io::osm::model::relation::{Member, Relation};
use osm_io::osm::model::tag::Tag;
use osm_io::osm::model::way::Way;
use rustc_hash::FxHashMap;

use crate::geometry::Location;

pub type NodeId = i64;
pub type WayId = i64;
pub type RelId = i64;
pub type LinkId = u64;

/// Dummy metadata set on every emitted object so editors accept the file.
pub const OSM_VERSION: i32 = 1;
pub const OSM_TIMESTAMP: i64 = 1;
pub const OSM_CHANGESET: i64 = 1;
pub const OSM_UID: i32 = 1;
pub const OSM_USER: &str = "import";

/// All mutable state of one conversion run.
///
/// Nodes, ways and relations are append-only arenas written in allocation
/// order; the output phases replay them as-is. The interner maps implement
/// the node de-duplication rules: `way_end_points` for grade-level street
/// endpoints keyed by location, `z_lvl_nodes` for stacked endpoints keyed by
/// location plus z-level. Interior vertices are never interned globally.
pub struct RunContext {
    next_id: i64,
    pub nodes: Vec<Node>,
    pub ways: Vec<Way>,
    pub relations: Vec<Relation>,
    /// way id -> position in `ways`, set once when the way is committed
    way_index: FxHashMap<WayId, usize>,
    /// node id -> location, for endpoint matching without re-parsing ways
    pub location_index: FxHashMap<NodeId, Location>,
    pub way_end_points: FxHashMap<Location, NodeId>,
    pub z_lvl_nodes: FxHashMap<(Location, i8), NodeId>,
    /// link id -> way ids in emission order; more than one entry iff the
    /// link's linestring was split by z-level
    pub link_id_map: MultiMap<LinkId, WayId>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            // pre-sized, grown on demand; never compacted or reordered
            nodes: Vec::with_capacity(100_000),
            ways: Vec::with_capacity(25_000),
            relations: Vec::with_capacity(1_000),
            way_index: FxHashMap::default(),
            location_index: FxHashMap::default(),
            way_end_points: FxHashMap::default(),
            z_lvl_nodes: FxHashMap::default(),
            link_id_map: MultiMap::new(),
        }
    }

    /// Hands out the next object id. Ids are unique across nodes, ways and
    /// relations and are never reused.
    pub fn allocate_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Creates a fresh node, never interned. Used for interior vertices.
    pub fn build_node(&mut self, location: Location) -> NodeId {
        self.build_node_with_tags(location, vec![])
    }

    pub fn build_node_with_tags(&mut self, location: Location, tags: Vec<Tag>) -> NodeId {
        let id = self.allocate_id();
        self.nodes.push(Node::new(
            id,
            OSM_VERSION,
            location.coordinate(),
            OSM_TIMESTAMP,
            OSM_CHANGESET,
            OSM_UID,
            OSM_USER.to_string(),
            true,
            tags,
        ));
        self.location_index.insert(id, location);
        id
    }

    /// Node for a street endpoint at grade level, interned by location.
    pub fn endpoint_node(&mut self, location: Location) -> NodeId {
        if let Some(&id) = self.way_end_points.get(&location) {
            return id;
        }
        let id = self.build_node(location);
        self.way_end_points.insert(location, id);
        id
    }

    /// Node for a street endpoint above or below grade, interned by
    /// location plus z-level so stacked endpoints stay distinct.
    pub fn zlvl_node(&mut self, location: Location, z_lvl: i8) -> NodeId {
        if let Some(&id) = self.z_lvl_nodes.get(&(location, z_lvl)) {
            return id;
        }
        let id = self.build_node(location);
        self.z_lvl_nodes.insert((location, z_lvl), id);
        id
    }

    pub fn build_way(&mut self, refs: Vec<NodeId>, tags: Vec<Tag>) -> WayId {
        let id = self.allocate_id();
        self.ways.push(Way::new(
            id,
            OSM_VERSION,
            OSM_TIMESTAMP,
            OSM_CHANGESET,
            OSM_UID,
            OSM_USER.to_string(),
            true,
            refs,
            tags,
        ));
        self.way_index.insert(id, self.ways.len() - 1);
        id
    }

    pub fn build_relation(&mut self, members: Vec<Member>, tags: Vec<Tag>) -> RelId {
        let id = self.allocate_id();
        self.relations.push(Relation::new(
            id,
            OSM_VERSION,
            OSM_TIMESTAMP,
            OSM_CHANGESET,
            OSM_UID,
            OSM_USER.to_string(),
            true,
            members,
            tags,
        ));
        id
    }

    pub fn record_link_way(&mut self, link_id: LinkId, way_id: WayId) {
        self.link_id_map.insert(link_id, way_id);
    }

    pub fn way(&self, id: WayId) -> Option<&Way> {
        self.way_index.get(&id).map(|&i| &self.ways[i])
    }

    /// Location of a way's first node.
    pub fn way_front(&self, id: WayId) -> Option<Location> {
        let way = self.way(id)?;
        self.location_index.get(way.refs().first()?).copied()
    }

    /// Location of a way's last node.
    pub fn way_back(&self, id: WayId) -> Option<Location> {
        let way = self.way(id)?;
        self.location_index.get(way.refs().last()?).copied()
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}
