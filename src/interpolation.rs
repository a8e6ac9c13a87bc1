use geo::LineString;
use log::warn;

use crate::context::RunContext;
use crate::geometry::{cut_caps, offset_curve, Location};
use crate::io::StreetRecord;
use crate::tags::{parse_house_number_schema, tag, to_camel_case_with_spaces};

/// Offset of the interpolation way from the street centreline, in degrees.
const HOUSE_NUMBER_OFFSET: f64 = 0.00005;

/// Synthesises address-interpolation ways for a street with reference
/// address ranges. Both sides are attempted independently, a failure on one
/// side leaves the other untouched.
pub fn create_house_numbers(ctx: &mut RunContext, street: &StreetRecord, ls: &LineString<f64>) {
    create_house_numbers_side(ctx, street, ls, true);
    create_house_numbers_side(ctx, street, ls, false);
}

fn create_house_numbers_side(
    ctx: &mut RunContext,
    street: &StreetRecord,
    ls: &LineString<f64>,
    left: bool,
) {
    let (ref_addr, nref_addr, addr_schema) = if left {
        (&street.l_refaddr, &street.l_nrefaddr, &street.l_addrsch)
    } else {
        (&street.r_refaddr, &street.r_nrefaddr, &street.r_addrsch)
    };
    if ref_addr.is_empty() || nref_addr.is_empty() || addr_schema.is_empty() {
        return;
    }
    if addr_schema == "M" {
        return;
    }
    let interpolation = match parse_house_number_schema(addr_schema) {
        Some(schema) => schema,
        None => {
            warn!(
                "link {}: unknown house number schema '{}', skipping side",
                street.link_id, addr_schema
            );
            return;
        }
    };

    let curve = match offset_curve(ls, HOUSE_NUMBER_OFFSET, left).and_then(|c| cut_caps(&c)) {
        Ok(curve) => curve,
        Err(e) => {
            warn!("link {}: skipping house numbers: {}", street.link_id, e);
            return;
        }
    };

    // the reference address sits at the start of the link; the offset curve
    // of the right side runs against the link direction
    let (first_addr, last_addr) =
        if left { (ref_addr, nref_addr) } else { (nref_addr, ref_addr) };

    let last = curve.0.len() - 1;
    let mut refs = Vec::with_capacity(curve.0.len());
    for (i, c) in curve.0.iter().enumerate() {
        let location = Location::from_coord(c);
        let node_id = if i == 0 {
            ctx.build_node_with_tags(location, vec![tag("addr:housenumber", first_addr)])
        } else if i == last {
            ctx.build_node_with_tags(location, vec![tag("addr:housenumber", last_addr)])
        } else {
            ctx.build_node(location)
        };
        refs.push(node_id);
    }

    let mut way_tags = vec![tag("addr:interpolation", interpolation)];
    if !street.st_name.is_empty() {
        way_tags.push(tag("addr:street", &to_camel_case_with_spaces(&street.st_name)));
    }
    ctx.build_way(refs, way_tags);
}
