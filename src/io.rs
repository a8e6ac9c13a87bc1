use std::path::{Path, PathBuf};

use geo::LineString;
use log::warn;
use shapefile::dbase::{self, FieldValue, Record};
use walkdir::WalkDir;

use crate::error::{ConvertError, Result};
use crate::geometry::Geometry;

pub const STREETS_SHP: &str = "Streets.shp";
pub const ADMINBNDY_SHPS: [&str; 5] = [
    "Adminbndy1.shp",
    "Adminbndy2.shp",
    "Adminbndy3.shp",
    "Adminbndy4.shp",
    "Adminbndy5.shp",
];
pub const WATER_POLY_SHP: &str = "WaterPoly.shp";
pub const WATER_SEG_SHP: &str = "WaterSeg.shp";
pub const LAND_USE_A_SHP: &str = "LandUseA.shp";
pub const LAND_USE_B_SHP: &str = "LandUseB.shp";

pub const MTD_AREA_DBF: &str = "MtdArea.dbf";
pub const MTD_CNTRY_REF_DBF: &str = "MtdCntryRef.dbf";
pub const RDMS_DBF: &str = "Rdms.dbf";
pub const CDMS_DBF: &str = "Cdms.dbf";
pub const CND_MOD_DBF: &str = "CndMod.dbf";
pub const ZLEVELS_DBF: &str = "Zlevels.dbf";
pub const MAJ_HWYS_DBF: &str = "MajHwys.dbf";
pub const SEC_HWYS_DBF: &str = "SecHwys.dbf";
pub const NAMED_PLC_DBF: &str = "NamedPlc.dbf";
pub const ALT_STREETS_DBF: &str = "AltStreets.dbf";

/// Files a directory must contain to take part in the conversion.
const REQUIRED_FILES: [&str; 9] = [
    STREETS_SHP,
    MTD_AREA_DBF,
    RDMS_DBF,
    CDMS_DBF,
    ZLEVELS_DBF,
    MAJ_HWYS_DBF,
    SEC_HWYS_DBF,
    NAMED_PLC_DBF,
    ALT_STREETS_DBF,
];

/// Recursively collects all directories below `root` that carry a complete
/// dataset. The result is sorted so repeated runs see the same order.
pub fn dataset_dirs(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(ConvertError::DatasetOpen {
            path: root.to_path_buf(),
            reason: "not a directory".to_string(),
        });
    }
    let mut dirs: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_dir() && contains_dataset(entry.path()) {
            dirs.push(entry.path().to_path_buf());
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn contains_dataset(dir: &Path) -> bool {
    REQUIRED_FILES.iter().all(|name| dir.join(name).is_file())
}

pub fn file_exists(dir: &Path, name: &str) -> bool {
    dir.join(name).is_file()
}

/// Reads a DBF table, parsing each row with `parse`. Rows that fail to parse
/// are logged and skipped; an unreadable table aborts the run.
pub fn read_dbf_rows<T>(path: &Path, parse: impl Fn(&Record) -> Result<T>) -> Result<Vec<T>> {
    let mut reader = dbase::Reader::from_path(path).map_err(|e| ConvertError::DatasetOpen {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let mut rows = Vec::new();
    for record in reader.iter_records() {
        let record = record.map_err(|e| ConvertError::DatasetOpen {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        match parse(&record) {
            Ok(row) => rows.push(row),
            Err(e) if e.is_run_fatal() => return Err(e),
            Err(e) => warn!("{}: skipping record: {}", path.display(), e),
        }
    }
    Ok(rows)
}

/// Reads a shapefile into geometry/attribute pairs. Features whose geometry
/// cannot be represented are logged and dropped.
pub fn read_features(path: &Path) -> Result<Vec<(Geometry, Record)>> {
    let mut reader = shapefile::Reader::from_path(path).map_err(|e| ConvertError::DatasetOpen {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let mut features = Vec::new();
    for pair in reader.iter_shapes_and_records() {
        let (shape, record) = pair.map_err(|e| ConvertError::DatasetOpen {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        match Geometry::from_shape(shape) {
            Ok(geometry) => features.push((geometry, record)),
            Err(e) => warn!("{}: skipping feature: {}", path.display(), e),
        }
    }
    Ok(features)
}

/* typed field access */

pub(crate) fn string_field(
    record: &Record,
    table: &'static str,
    column: &'static str,
) -> Result<String> {
    match record.get(column) {
        None => Err(ConvertError::MissingColumn { table, column }),
        Some(FieldValue::Character(Some(s))) => Ok(s.trim().to_string()),
        Some(FieldValue::Character(None)) => Ok(String::new()),
        Some(FieldValue::Numeric(Some(n))) => {
            if n.fract() == 0.0 {
                Ok(format!("{}", *n as i64))
            } else {
                Ok(n.to_string())
            }
        }
        Some(FieldValue::Numeric(None)) => Ok(String::new()),
        Some(FieldValue::Integer(i)) => Ok(i.to_string()),
        Some(FieldValue::Float(Some(v))) => Ok(v.to_string()),
        Some(FieldValue::Float(None)) => Ok(String::new()),
        Some(FieldValue::Double(v)) => Ok(v.to_string()),
        Some(other) => Err(ConvertError::FieldFormat {
            column: column.to_string(),
            value: format!("{:?}", other),
        }),
    }
}

pub(crate) fn u64_field(record: &Record, table: &'static str, column: &'static str) -> Result<u64> {
    match opt_u64_field(record, table, column)? {
        Some(v) => Ok(v),
        None => Err(ConvertError::FieldFormat {
            column: column.to_string(),
            value: String::new(),
        }),
    }
}

pub(crate) fn opt_u64_field(
    record: &Record,
    table: &'static str,
    column: &'static str,
) -> Result<Option<u64>> {
    let fail = |value: String| ConvertError::FieldFormat { column: column.to_string(), value };
    match record.get(column) {
        None => Err(ConvertError::MissingColumn { table, column }),
        Some(FieldValue::Numeric(Some(n))) => {
            if *n >= 0.0 && n.fract() == 0.0 {
                Ok(Some(*n as u64))
            } else {
                Err(fail(n.to_string()))
            }
        }
        Some(FieldValue::Numeric(None)) => Ok(None),
        Some(FieldValue::Integer(i)) => {
            if *i >= 0 {
                Ok(Some(*i as u64))
            } else {
                Err(fail(i.to_string()))
            }
        }
        Some(FieldValue::Character(Some(s))) => {
            let s = s.trim();
            if s.is_empty() {
                Ok(None)
            } else {
                s.parse::<u64>().map(Some).map_err(|_| fail(s.to_string()))
            }
        }
        Some(FieldValue::Character(None)) => Ok(None),
        Some(other) => Err(fail(format!("{:?}", other))),
    }
}

pub(crate) fn i64_field(record: &Record, table: &'static str, column: &'static str) -> Result<i64> {
    let fail = |value: String| ConvertError::FieldFormat { column: column.to_string(), value };
    match record.get(column) {
        None => Err(ConvertError::MissingColumn { table, column }),
        Some(FieldValue::Numeric(Some(n))) => {
            if n.fract() == 0.0 {
                Ok(*n as i64)
            } else {
                Err(fail(n.to_string()))
            }
        }
        Some(FieldValue::Numeric(None)) => Err(fail(String::new())),
        Some(FieldValue::Integer(i)) => Ok(*i as i64),
        Some(FieldValue::Character(Some(s))) => {
            s.trim().parse::<i64>().map_err(|_| fail(s.to_string()))
        }
        Some(other) => Err(fail(format!("{:?}", other))),
    }
}

fn yn_field(record: &Record, table: &'static str, column: &'static str) -> Result<bool> {
    Ok(string_field(record, table, column)? == "Y")
}

/* typed records */

#[derive(Debug, Clone, Default)]
pub struct StreetRecord {
    pub link_id: u64,
    pub st_name: String,
    pub func_class: String,
    pub dir_travel: String,
    pub ferry_type: String,
    pub l_area_id: u64,
    pub r_area_id: u64,
    pub addr_type: String,
    pub l_refaddr: String,
    pub l_nrefaddr: String,
    pub l_addrsch: String,
    pub r_refaddr: String,
    pub r_nrefaddr: String,
    pub r_addrsch: String,
    pub phys_lanes: u64,
    pub speed_cat: u64,
    pub fr_spd_lim: u64,
    pub to_spd_lim: u64,
    pub paved: bool,
    pub bridge: bool,
    pub tunnel: bool,
    pub tollway: bool,
    pub roundabout: bool,
    pub contracc: bool,
    pub fourwhldr: bool,
    pub urban: bool,
    pub pub_access: bool,
    pub private: bool,
    pub ar_auto: bool,
    pub ar_bus: bool,
    pub ar_taxis: bool,
    pub ar_carpool: bool,
    pub ar_pedestrians: bool,
    pub ar_emerveh: bool,
    pub ar_motorcycles: bool,
    pub ar_through_traffic: bool,
}

impl StreetRecord {
    pub fn from_record(record: &Record) -> Result<StreetRecord> {
        const T: &str = "Streets";
        Ok(StreetRecord {
            link_id: u64_field(record, T, "LINK_ID")?,
            st_name: string_field(record, T, "ST_NAME")?,
            func_class: string_field(record, T, "FUNC_CLASS")?,
            dir_travel: string_field(record, T, "DIR_TRAVEL")?,
            ferry_type: string_field(record, T, "FERRY_TYPE")?,
            l_area_id: opt_u64_field(record, T, "L_AREA_ID")?.unwrap_or(0),
            r_area_id: opt_u64_field(record, T, "R_AREA_ID")?.unwrap_or(0),
            addr_type: string_field(record, T, "ADDR_TYPE")?,
            l_refaddr: string_field(record, T, "L_REFADDR")?,
            l_nrefaddr: string_field(record, T, "L_NREFADDR")?,
            l_addrsch: string_field(record, T, "L_ADDRSCH")?,
            r_refaddr: string_field(record, T, "R_REFADDR")?,
            r_nrefaddr: string_field(record, T, "R_NREFADDR")?,
            r_addrsch: string_field(record, T, "R_ADDRSCH")?,
            phys_lanes: opt_u64_field(record, T, "PHYS_LANES")?.unwrap_or(0),
            speed_cat: opt_u64_field(record, T, "SPEED_CAT")?.unwrap_or(0),
            fr_spd_lim: opt_u64_field(record, T, "FR_SPD_LIM")?.unwrap_or(0),
            to_spd_lim: opt_u64_field(record, T, "TO_SPD_LIM")?.unwrap_or(0),
            paved: yn_field(record, T, "PAVED")?,
            bridge: yn_field(record, T, "BRIDGE")?,
            tunnel: yn_field(record, T, "TUNNEL")?,
            tollway: yn_field(record, T, "TOLLWAY")?,
            roundabout: yn_field(record, T, "ROUNDABOUT")?,
            contracc: yn_field(record, T, "CONTRACC")?,
            fourwhldr: yn_field(record, T, "FOURWHLDR")?,
            urban: yn_field(record, T, "URBAN")?,
            pub_access: yn_field(record, T, "PUB_ACCESS")?,
            private: yn_field(record, T, "PRIVATE")?,
            ar_auto: yn_field(record, T, "AR_AUTO")?,
            ar_bus: yn_field(record, T, "AR_BUS")?,
            ar_taxis: yn_field(record, T, "AR_TAXIS")?,
            ar_carpool: yn_field(record, T, "AR_CARPOOL")?,
            ar_pedestrians: yn_field(record, T, "AR_PEDEST")?,
            ar_emerveh: yn_field(record, T, "AR_EMERVEH")?,
            ar_motorcycles: yn_field(record, T, "AR_MOTOR")?,
            ar_through_traffic: yn_field(record, T, "AR_TRAFF")?,
        })
    }
}

/// Reads `Streets.shp` into linestring/attribute pairs. Features with a
/// broken geometry or an unparsable attribute row are logged and dropped.
pub fn read_street_features(path: &Path) -> Result<Vec<(LineString<f64>, StreetRecord)>> {
    let mut streets = Vec::new();
    for (geometry, record) in read_features(path)? {
        let ls = match geometry.into_line_string() {
            Ok(ls) => ls,
            Err(e) => {
                warn!("{}: skipping feature: {}", path.display(), e);
                continue;
            }
        };
        match StreetRecord::from_record(&record) {
            Ok(street) => streets.push((ls, street)),
            Err(e) => warn!("{}: skipping feature: {}", path.display(), e),
        }
    }
    Ok(streets)
}

#[derive(Debug, Clone)]
pub struct ZLevelRow {
    pub link_id: u64,
    pub point_num: u64,
    pub z_level: i64,
}

impl ZLevelRow {
    pub fn from_record(record: &Record) -> Result<ZLevelRow> {
        const T: &str = "Zlevels";
        Ok(ZLevelRow {
            link_id: u64_field(record, T, "LINK_ID")?,
            point_num: u64_field(record, T, "POINT_NUM")?,
            z_level: i64_field(record, T, "Z_LEVEL")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RdmsRow {
    pub cond_id: u64,
    pub link_id: u64,
    pub man_linkid: u64,
}

impl RdmsRow {
    pub fn from_record(record: &Record) -> Result<RdmsRow> {
        const T: &str = "Rdms";
        Ok(RdmsRow {
            cond_id: u64_field(record, T, "COND_ID")?,
            link_id: u64_field(record, T, "LINK_ID")?,
            man_linkid: u64_field(record, T, "MAN_LINKID")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CdmsRow {
    pub cond_id: u64,
    pub link_id: u64,
    pub cond_type: u64,
}

impl CdmsRow {
    pub fn from_record(record: &Record) -> Result<CdmsRow> {
        const T: &str = "Cdms";
        Ok(CdmsRow {
            cond_id: u64_field(record, T, "COND_ID")?,
            link_id: u64_field(record, T, "LINK_ID")?,
            cond_type: u64_field(record, T, "COND_TYPE")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CndModRow {
    pub cond_id: u64,
    pub mod_type: u64,
    pub mod_val: u64,
}

impl CndModRow {
    pub fn from_record(record: &Record) -> Result<CndModRow> {
        const T: &str = "CndMod";
        Ok(CndModRow {
            cond_id: u64_field(record, T, "COND_ID")?,
            mod_type: u64_field(record, T, "CM_MOD_TYPE")?,
            mod_val: u64_field(record, T, "CM_MOD_VAL")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct MtdAreaRow {
    pub area_id: u64,
    pub admin_lvl: u64,
    pub lang_code: String,
    pub area_name: String,
    pub area_code_1: u64,
    pub govt_code: u64,
}

impl MtdAreaRow {
    pub fn from_record(record: &Record) -> Result<MtdAreaRow> {
        const T: &str = "MtdArea";
        Ok(MtdAreaRow {
            area_id: u64_field(record, T, "AREA_ID")?,
            admin_lvl: opt_u64_field(record, T, "ADMIN_LVL")?.unwrap_or(0),
            lang_code: string_field(record, T, "LANG_CODE")?,
            area_name: string_field(record, T, "AREA_NAME")?,
            area_code_1: opt_u64_field(record, T, "AREA_CODE_1")?.unwrap_or(0),
            govt_code: opt_u64_field(record, T, "GOVT_CODE")?.unwrap_or(0),
        })
    }
}

#[derive(Debug, Clone)]
pub struct CntryRefRow {
    pub govt_code: u64,
    pub unit_measure: String,
    pub speed_limit_unit: String,
    pub iso_code: String,
}

impl CntryRefRow {
    pub fn from_record(record: &Record) -> Result<CntryRefRow> {
        const T: &str = "MtdCntryRef";
        Ok(CntryRefRow {
            govt_code: u64_field(record, T, "GOVT_CODE")?,
            unit_measure: string_field(record, T, "UNTMEASURE")?,
            speed_limit_unit: string_field(record, T, "SPDLIMUNIT")?,
            iso_code: string_field(record, T, "ISO_CODE")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AltStreetRow {
    pub link_id: u64,
    pub route_type: Option<u64>,
}

impl AltStreetRow {
    pub fn from_record(record: &Record) -> Result<AltStreetRow> {
        const T: &str = "AltStreets";
        Ok(AltStreetRow {
            link_id: u64_field(record, T, "LINK_ID")?,
            route_type: opt_u64_field(record, T, "ROUTE_TYPE")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct HighwayNameRow {
    pub link_id: u64,
    pub highway_nm: String,
}

impl HighwayNameRow {
    pub fn from_record(record: &Record) -> Result<HighwayNameRow> {
        const T: &str = "MajHwys/SecHwys";
        Ok(HighwayNameRow {
            link_id: u64_field(record, T, "LINK_ID")?,
            highway_nm: string_field(record, T, "HIGHWAY_NM")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NamedPlaceRow {
    pub link_id: u64,
    pub fac_type: u64,
    pub poi_name: String,
}

impl NamedPlaceRow {
    pub fn from_record(record: &Record) -> Result<NamedPlaceRow> {
        const T: &str = "NamedPlc";
        let poi_name = match string_field(record, T, "POI_NAME") {
            Ok(name) => name,
            Err(ConvertError::MissingColumn { .. }) => string_field(record, T, "PLACE_NM")?,
            Err(e) => return Err(e),
        };
        Ok(NamedPlaceRow {
            link_id: u64_field(record, T, "LINK_ID")?,
            fac_type: opt_u64_field(record, T, "FAC_TYPE")?.unwrap_or(0),
            poi_name,
        })
    }
}
