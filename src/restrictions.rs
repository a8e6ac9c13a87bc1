use std::path::Path;

use itertools::Itertools;
use log::warn;
use osm_io::osm::model::relation::{Member, MemberData};
use rustc_hash::FxHashMap;

use crate::context::{LinkId, NodeId, RunContext, WayId};
use crate::error::Result;
use crate::io::{self, CdmsRow, RdmsRow};
use crate::tags::{tag, COND_TYPE_RESTRICTED_MANOEUVRE};

/// Reads the manoeuvre tables of all dataset directories and emits one
/// turn-restriction relation per restricted driving manoeuvre whose link
/// chain resolves in the link-id map.
pub fn add_turn_restrictions(ctx: &mut RunContext, dirs: &[std::path::PathBuf]) -> Result<()> {
    let mut cond_types: FxHashMap<u64, u64> = FxHashMap::default();
    for dir in dirs {
        for row in io::read_dbf_rows(&dir.join(io::CDMS_DBF), CdmsRow::from_record)? {
            cond_types.insert(row.cond_id, row.cond_type);
        }
    }
    for dir in dirs {
        add_turn_restrictions_from(ctx, &dir.join(io::RDMS_DBF), &cond_types)?;
    }
    Ok(())
}

fn add_turn_restrictions_from(
    ctx: &mut RunContext,
    rdms_path: &Path,
    cond_types: &FxHashMap<u64, u64>,
) -> Result<()> {
    let rows = io::read_dbf_rows(rdms_path, RdmsRow::from_record)?;
    let manoeuvres = rows.iter().chunk_by(|row| row.cond_id);
    for (cond_id, group) in &manoeuvres {
        let group: Vec<&RdmsRow> = group.collect();
        // conditions missing from Cdms are treated as restricted manoeuvres
        if let Some(&cond_type) = cond_types.get(&cond_id) {
            if cond_type != COND_TYPE_RESTRICTED_MANOEUVRE {
                continue;
            }
        }
        let mut link_ids: Vec<LinkId> = Vec::with_capacity(group.len() + 1);
        link_ids.push(group[0].link_id);
        link_ids.extend(group.iter().map(|row| row.man_linkid));

        match collect_way_chain(ctx, &link_ids) {
            Some(way_ids) if way_ids.len() >= 2 => {
                build_turn_restriction(ctx, &way_ids);
            }
            _ => warn!("dropping manoeuvre {}: link chain does not resolve", cond_id),
        }
    }
    Ok(())
}

/// Expands the link sequence of a manoeuvre into an ordered way-id chain.
///
/// The first link is assumed to run in its natural direction; the second
/// link corrects that assumption when the chain front matches it. From then
/// on the free endpoint is propagated by matching the next link's outer way
/// endpoints; a link whose ways run against the chain is appended reversed.
/// Returns `None` when a link is unknown or no endpoint matches.
pub(crate) fn collect_way_chain(ctx: &RunContext, link_ids: &[LinkId]) -> Option<Vec<WayId>> {
    let mut chain: Vec<WayId> = Vec::new();
    let mut end_front = None;
    let mut end_back = None;

    for (ctr, link_id) in link_ids.iter().enumerate() {
        let way_ids = ctx.link_id_map.get_vec(link_id)?;
        let first_way_front = ctx.way_front(*way_ids.first()?)?;
        let last_way_back = ctx.way_back(*way_ids.last()?)?;

        if ctr == 0 {
            end_front = Some(first_way_front);
            end_back = Some(last_way_back);
        } else {
            if ctr == 1
                && (end_front == Some(first_way_front) || end_front == Some(last_way_back))
            {
                chain.reverse();
                std::mem::swap(&mut end_front, &mut end_back);
            }
            if end_back == Some(last_way_back) {
                end_back = Some(first_way_front);
            } else if end_back == Some(first_way_front) {
                end_back = Some(last_way_back);
            } else {
                return None;
            }
        }

        let mut reverse = false;
        if way_ids.len() > 1 {
            if end_back == Some(first_way_front) {
                reverse = true;
            } else if end_back != Some(last_way_back) {
                return None;
            }
        }
        if reverse {
            chain.extend(way_ids.iter().rev().copied());
        } else {
            chain.extend(way_ids.iter().copied());
        }
    }
    Some(chain)
}

/// Emits the relation: `from`, interior `via` ways, `to`, plus the shared
/// endpoint node as `via` when the chain is exactly two ways.
fn build_turn_restriction(ctx: &mut RunContext, way_ids: &[WayId]) {
    let mut members = Vec::with_capacity(way_ids.len() + 1);
    members.push(Member::Way {
        member: MemberData::new(way_ids[0], "from".to_string()),
    });
    for &way_id in &way_ids[1..way_ids.len() - 1] {
        members.push(Member::Way { member: MemberData::new(way_id, "via".to_string()) });
    }
    if way_ids.len() == 2 {
        if let Some(node_id) = common_via_node(ctx, way_ids[0], way_ids[1]) {
            members.push(Member::Node { member: MemberData::new(node_id, "via".to_string()) });
        }
    }
    members.push(Member::Way {
        member: MemberData::new(way_ids[way_ids.len() - 1], "to".to_string()),
    });

    // TODO derive the actual manoeuvre direction instead of no_straight_on
    let tags = vec![tag("type", "restriction"), tag("restriction", "no_straight_on")];
    ctx.build_relation(members, tags);
}

/// Endpoint node shared by the two ways, resolved through the endpoint
/// interner. A miss is logged and the via node is left out.
fn common_via_node(ctx: &RunContext, from_way: WayId, to_way: WayId) -> Option<NodeId> {
    let from_front = ctx.way_front(from_way)?;
    let from_back = ctx.way_back(from_way)?;
    let to_front = ctx.way_front(to_way)?;
    let to_back = ctx.way_back(to_way)?;

    let location = if from_front == to_front || from_front == to_back {
        from_front
    } else {
        debug_assert!(from_back == to_front || from_back == to_back);
        from_back
    };
    match ctx.way_end_points.get(&location) {
        Some(&node_id) => Some(node_id),
        None => {
            warn!("skipping via node: shared endpoint is not an interned way end point");
            None
        }
    }
}
