use std::path::Path;

use rustc_hash::FxHashMap;

use crate::context::LinkId;
use crate::error::{ConvertError, Result};
use crate::io::{self, ZLevelRow};

/// Vertex index within a link's linestring paired with its z-level.
pub type IndexZLvl = (usize, i8);

/// Per link, the ordered sparse list of vertices whose z-level is not zero.
/// Vertices missing from the list are implicitly at level zero.
pub type ZLevelMap = FxHashMap<LinkId, Vec<IndexZLvl>>;

pub const Z_LVL_MIN: i64 = -4;
pub const Z_LVL_MAX: i64 = 5;

pub fn check_z_lvl_range(z_lvl: i64) -> Result<i8> {
    if (Z_LVL_MIN..=Z_LVL_MAX).contains(&z_lvl) {
        Ok(z_lvl as i8)
    } else {
        Err(ConvertError::ZLevelOutOfRange(z_lvl))
    }
}

/// Reads `Zlevels.dbf` rows into `z_level_map`. `POINT_NUM` is 1-based in
/// the table; rows at level zero are dropped. Row order within a link is
/// kept as delivered, the table comes pre-sorted.
pub fn read_z_levels(path: &Path, z_level_map: &mut ZLevelMap) -> Result<()> {
    let rows = io::read_dbf_rows(path, ZLevelRow::from_record)?;
    for row in rows {
        match insert_row(z_level_map, &row) {
            Ok(()) => {}
            Err(e) if e.is_run_fatal() => return Err(e),
            Err(e) => log::warn!("{}: skipping record: {}", path.display(), e),
        }
    }
    Ok(())
}

fn insert_row(z_level_map: &mut ZLevelMap, row: &ZLevelRow) -> Result<()> {
    let z_lvl = check_z_lvl_range(row.z_level)?;
    if row.point_num == 0 {
        return Err(ConvertError::FieldFormat {
            column: "POINT_NUM".to_string(),
            value: row.point_num.to_string(),
        });
    }
    if z_lvl != 0 {
        z_level_map
            .entry(row.link_id)
            .or_default()
            .push(((row.point_num - 1) as usize, z_lvl));
    }
    Ok(())
}

/// Ferry links only stack at their endpoints: every z-level marker that is
/// not on the first or last vertex is dropped before splitting.
pub fn set_ferry_z_lvls_to_zero(z_lvl_vec: &mut Vec<IndexZLvl>, last_index: usize) {
    if z_lvl_vec.len() > 2 {
        z_lvl_vec.drain(1..z_lvl_vec.len() - 1);
    }
    if let Some(&(first, _)) = z_lvl_vec.first() {
        if first != 0 {
            z_lvl_vec.remove(0);
        }
    }
    if let Some(&(last, _)) = z_lvl_vec.last() {
        if last != last_index {
            z_lvl_vec.pop();
        }
    }
}
