use std::path::Path;

use log::warn;

use crate::context::RunContext;
use crate::error::Result;
use crate::io::{self, NamedPlaceRow};
use crate::tags::{tag, to_camel_case_with_spaces};

/// Facility type of a city centre in `NamedPlc`.
const FAC_TYPE_CITY_CENTRE: u64 = 4444;

/// Emits one place node per named-place row, anchored at the first node of
/// the first way recorded for the row's link. Rows whose link never made it
/// into the street graph are logged and skipped.
pub fn add_city_nodes(ctx: &mut RunContext, dir: &Path) -> Result<()> {
    let rows = io::read_dbf_rows(&dir.join(io::NAMED_PLC_DBF), NamedPlaceRow::from_record)?;
    for row in rows {
        add_city_node(ctx, &row);
    }
    Ok(())
}

fn add_city_node(ctx: &mut RunContext, row: &NamedPlaceRow) {
    let first_way = ctx
        .link_id_map
        .get_vec(&row.link_id)
        .and_then(|way_ids| way_ids.first().copied());
    let location = first_way.and_then(|way_id| ctx.way_front(way_id));
    match location {
        Some(location) => {
            let place = if row.fac_type == FAC_TYPE_CITY_CENTRE { "city" } else { "town" };
            let mut node_tags = vec![tag("place", place)];
            if !row.poi_name.is_empty() {
                node_tags.push(tag("name", &to_camel_case_with_spaces(&row.poi_name)));
            }
            ctx.build_node_with_tags(location, node_tags);
        }
        None => warn!(
            "named place '{}': link {} is not part of the street graph",
            row.poi_name, row.link_id
        ),
    }
}
