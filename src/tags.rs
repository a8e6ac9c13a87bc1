use std::cell::OnceCell;
use std::path::PathBuf;

use log::warn;
use multimap::MultiMap;
use osm_io::osm::model::tag::Tag;
use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::context::LinkId;
use crate::error::{ConvertError, Result};
use crate::io::{CntryRefRow, StreetRecord};

/// Condition type of a restricted driving manoeuvre in `Cdms`.
pub const COND_TYPE_RESTRICTED_MANOEUVRE: u64 = 7;
/// Condition type of a transport access restriction in `Cdms`.
pub const COND_TYPE_TRANSPORT_ACCESS: u64 = 23;

/// Conditional-modifier types carried by `CndMod` for transport access
/// restrictions. Values are centimetres resp. kilograms in metric
/// countries, inches resp. pounds elsewhere.
pub const MOD_TYPE_MAX_HEIGHT: u64 = 38;
pub const MOD_TYPE_MAX_WEIGHT: u64 = 39;
pub const MOD_TYPE_MAX_LENGTH: u64 = 41;
pub const MOD_TYPE_MAX_WIDTH: u64 = 42;

const INCH_BASE: u64 = 12;
const POUND_BASE: f64 = 2000.0;
// short ton in metric tons (see http://wiki.openstreetmap.org/wiki/Key:maxweight)
const SHORT_TON: f64 = 0.907_184_74;

/// Side tables preloaded per run and handed read-only to the translator.
#[derive(Default)]
pub struct SideTables {
    /// AREA_ID -> GOVT_CODE from MtdArea
    pub area_govt_codes: FxHashMap<u64, u64>,
    /// GOVT_CODE -> country reference from MtdCntryRef
    pub cntry_refs: FxHashMap<u64, CntryRefRow>,
    /// LINK_ID -> (COND_ID, COND_TYPE) from Cdms
    pub cdms: MultiMap<u64, (u64, u64)>,
    /// COND_ID -> (CM_MOD_TYPE, CM_MOD_VAL) rows from CndMod
    pub cnd_mods: FxHashMap<u64, Vec<(u64, u64)>>,
    /// LINK_ID -> lowest ROUTE_TYPE from AltStreets
    pub route_types: FxHashMap<u64, u64>,
    /// LINK_ID -> highway names from MajHwys/SecHwys
    pub highway_names: FxHashMap<u64, Vec<String>>,
}

/// Translates feature attributes into OSM tags. Pure: identical inputs give
/// identical outputs; the ISO-639 table is loaded from disk the first time
/// a language code is translated.
pub struct TagTranslator {
    pub tables: SideTables,
    iso_path: PathBuf,
    lang_codes: OnceCell<FxHashMap<String, String>>,
}

impl TagTranslator {
    pub fn new(tables: SideTables, iso_path: PathBuf) -> Self {
        Self { tables, iso_path, lang_codes: OnceCell::new() }
    }

    /// Maps the attributes of one street feature to OSM tags. Returns the
    /// link id it observed together with the tags.
    pub fn street_tags(&self, street: &StreetRecord) -> Result<(LinkId, Vec<Tag>)> {
        let mut tags = vec![tag("LINK_ID", &street.link_id.to_string())];

        if !street.st_name.is_empty() {
            tags.push(tag("name", &to_camel_case_with_spaces(&street.st_name)));
        }

        if is_ferry(&street.ferry_type)? {
            let route = if street.ferry_type == "B" { "ferry" } else { "shuttle_train" };
            tags.push(tag("route", route));
        } else {
            tags.push(tag("highway", self.highway_class(street)?));
        }

        if let Some(oneway) = parse_one_way(&street.dir_travel)? {
            tags.push(tag("oneway", oneway));
        }

        tags.push(yes_no_tag("motorcar", street.ar_auto));
        tags.push(yes_no_tag("bus", street.ar_bus));
        tags.push(yes_no_tag("taxi", street.ar_taxis));
        tags.push(yes_no_tag("hov", street.ar_carpool));
        tags.push(yes_no_tag("foot", street.ar_pedestrians));
        tags.push(yes_no_tag("emergency", street.ar_emerveh));
        tags.push(yes_no_tag("motorcycle", street.ar_motorcycles));
        if !street.ar_through_traffic {
            tags.push(tag("access", "destination"));
        }
        if !street.pub_access || street.private {
            tags.push(tag("access", "private"));
        }

        if street.paved {
            tags.push(tag("surface", "paved"));
        }
        if street.bridge {
            tags.push(tag("bridge", "yes"));
        }
        if street.tunnel {
            tags.push(tag("tunnel", "yes"));
        }
        if street.tollway {
            tags.push(tag("toll", "yes"));
        }
        if street.roundabout {
            tags.push(tag("junction", "roundabout"));
        }
        if street.fourwhldr {
            tags.push(tag("4wd_only", "yes"));
        }
        if street.phys_lanes > 0 {
            tags.push(tag("lanes", &street.phys_lanes.to_string()));
        }

        let country = self.country_ref(street);
        let speed_limit = street.fr_spd_lim.max(street.to_spd_lim);
        if speed_limit > 0 {
            let mph = country.map_or(false, |c| c.speed_limit_unit == "MPH");
            let value =
                if mph { format!("{} mph", speed_limit) } else { speed_limit.to_string() };
            tags.push(tag("maxspeed", &value));
        } else if let Some(kmh) = speed_cat_to_kmh(street.speed_cat) {
            // category upper bounds are km/h in every market
            tags.push(tag("maxspeed", &kmh.to_string()));
        }

        if let Some(names) = self.tables.highway_names.get(&street.link_id) {
            if let Some(first) = names.first() {
                tags.push(tag("ref", &to_camel_case_with_spaces(first)));
            }
        }

        self.add_truck_restriction_tags(street, country, &mut tags);

        Ok((street.link_id, tags))
    }

    fn highway_class(&self, street: &StreetRecord) -> Result<&'static str> {
        if let Some(route_type) = self.tables.route_types.get(&street.link_id) {
            if let Some(highway) = highway_from_route_type(*route_type) {
                return Ok(highway);
            }
        }
        if street.contracc {
            return Ok("motorway");
        }
        match street.func_class.as_str() {
            "1" => Ok("motorway"),
            "2" => Ok("primary"),
            "3" => Ok("secondary"),
            "4" => Ok("tertiary"),
            "5" => Ok("residential"),
            other => Err(ConvertError::UnknownEnumValue {
                column: "FUNC_CLASS",
                value: other.to_string(),
            }),
        }
    }

    /// Dimension and weight limits attached to the link via transport
    /// access restriction conditions.
    fn add_truck_restriction_tags(
        &self,
        street: &StreetRecord,
        country: Option<&CntryRefRow>,
        tags: &mut Vec<Tag>,
    ) {
        let imperial = country.map_or(false, |c| c.unit_measure == "E");
        let conds = match self.tables.cdms.get_vec(&street.link_id) {
            Some(conds) => conds,
            None => return,
        };
        for (cond_id, cond_type) in conds {
            if *cond_type != COND_TYPE_TRANSPORT_ACCESS {
                continue;
            }
            let mods = match self.tables.cnd_mods.get(cond_id) {
                Some(mods) => mods,
                None => continue,
            };
            for &(mod_type, mod_val) in mods {
                if mod_val == 0 {
                    continue;
                }
                match mod_type {
                    MOD_TYPE_MAX_HEIGHT => {
                        let v = if imperial { inch_to_feet(mod_val) } else { cm_to_m(mod_val) };
                        tags.push(tag("maxheight", &v));
                    }
                    MOD_TYPE_MAX_WEIGHT => {
                        let v = if imperial {
                            lbs_to_metric_ton(mod_val as f64)
                        } else {
                            kg_to_t(mod_val)
                        };
                        tags.push(tag("maxweight", &v));
                    }
                    MOD_TYPE_MAX_LENGTH => {
                        let v = if imperial { inch_to_feet(mod_val) } else { cm_to_m(mod_val) };
                        tags.push(tag("maxlength", &v));
                    }
                    MOD_TYPE_MAX_WIDTH => {
                        let v = if imperial { inch_to_feet(mod_val) } else { cm_to_m(mod_val) };
                        tags.push(tag("maxwidth", &v));
                    }
                    _ => {}
                }
            }
        }
    }

    fn country_ref(&self, street: &StreetRecord) -> Option<&CntryRefRow> {
        let area_id =
            if street.l_area_id != 0 { street.l_area_id } else { street.r_area_id };
        let govt_code = self.tables.area_govt_codes.get(&area_id)?;
        self.tables.cntry_refs.get(govt_code)
    }

    /// ISO-639-2 to ISO-639-1. Unknown codes keep the lowercased input.
    pub fn lang_code(&self, code: &str) -> String {
        let code = code.to_lowercase();
        let map = self.lang_codes.get_or_init(|| match load_lang_codes(&self.iso_path) {
            Ok(map) => map,
            Err(e) => {
                warn!("could not read language code table {}: {}", self.iso_path.display(), e);
                FxHashMap::default()
            }
        });
        match map.get(&code) {
            Some(iso1) => iso1.clone(),
            None => {
                warn!("language code '{}' not found", code);
                code
            }
        }
    }
}

/// One row of the pipe-separated ISO-639-2 registry:
/// `alpha3-bib|alpha3-term|alpha2|english name|french name`.
#[derive(Debug, Deserialize)]
struct LangCodeRow {
    iso_639_2: String,
    _iso_639_2_term: String,
    iso_639_1: String,
    _english_name: String,
    _french_name: String,
}

/// Rows without an alpha2 code are not translatable and are skipped.
fn load_lang_codes(path: &std::path::Path) -> Result<FxHashMap<String, String>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'|')
        .has_headers(false)
        .from_path(path)
        .map_err(|e| ConvertError::DatasetOpen {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    let mut map = FxHashMap::default();
    for row in reader.deserialize::<LangCodeRow>() {
        let row = row.map_err(|e| ConvertError::DatasetOpen {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if !row.iso_639_2.is_empty() && !row.iso_639_1.is_empty() {
            map.insert(row.iso_639_2.to_lowercase(), row.iso_639_1.clone());
        }
    }
    Ok(map)
}

pub fn tag(k: &str, v: &str) -> Tag {
    Tag::new(k.to_string(), v.to_string())
}

fn yes_no_tag(k: &str, v: bool) -> Tag {
    tag(k, if v { "yes" } else { "no" })
}

/// `F` is traversal from the reference node, `T` towards it, `B` both ways.
pub fn parse_one_way(dir_travel: &str) -> Result<Option<&'static str>> {
    match dir_travel {
        "F" => Ok(Some("yes")),
        // TODO reverse the way instead of using "-1"
        "T" => Ok(Some("-1")),
        "B" => Ok(None),
        other => Err(ConvertError::UnknownEnumValue {
            column: "DIR_TRAVEL",
            value: other.to_string(),
        }),
    }
}

/// `H` marks a plain road, `B` a boat ferry, `R` a rail ferry.
pub fn is_ferry(ferry_type: &str) -> Result<bool> {
    match ferry_type {
        "" | "H" => Ok(false),
        "B" | "R" => Ok(true),
        other => Err(ConvertError::UnknownEnumValue {
            column: "FERRY_TYPE",
            value: other.to_string(),
        }),
    }
}

/// Upper bound of a speed category in km/h, used when no explicit limit is
/// recorded. Category 1 is open-ended.
fn speed_cat_to_kmh(speed_cat: u64) -> Option<u64> {
    match speed_cat {
        1 | 2 => Some(130),
        3 => Some(100),
        4 => Some(90),
        5 => Some(70),
        6 => Some(50),
        7 => Some(30),
        8 => Some(10),
        _ => None,
    }
}

fn highway_from_route_type(route_type: u64) -> Option<&'static str> {
    match route_type {
        1 => Some("motorway"),
        2 => Some("trunk"),
        3 => Some("primary"),
        4 => Some("secondary"),
        5 => Some("tertiary"),
        6 => Some("residential"),
        _ => None,
    }
}

pub const NAVTEQ_ADMIN_LVL_MIN: u64 = 1;
pub const NAVTEQ_ADMIN_LVL_MAX: u64 = 7;

/// Doubles the admin level, the dataset counts 1..7 where OSM uses 2..14.
pub fn osm_admin_level(navteq_admin_lvl: u64) -> Option<String> {
    if (NAVTEQ_ADMIN_LVL_MIN..=NAVTEQ_ADMIN_LVL_MAX).contains(&navteq_admin_lvl) {
        Some((2 * navteq_admin_lvl).to_string())
    } else {
        None
    }
}

pub fn parse_house_number_schema(schema: &str) -> Option<&'static str> {
    match schema {
        "E" => Some("even"),
        "O" => Some("odd"),
        _ => None,
    }
}

pub fn to_camel_case_with_spaces(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut new_word = true;
    for ch in s.chars() {
        if ch.is_alphabetic() {
            if new_word {
                out.extend(ch.to_uppercase());
                new_word = false;
            } else {
                out.extend(ch.to_lowercase());
            }
        } else {
            new_word = true;
            out.push(ch);
        }
    }
    out
}

pub fn kg_to_t(kilo: u64) -> String {
    format!("{}", kilo as f64 / 1000.0)
}

pub fn cm_to_m(cm: u64) -> String {
    format!("{}", cm as f64 / 100.0)
}

pub fn inch_to_feet(inches: u64) -> String {
    format!("{}'{}\"", inches / INCH_BASE, inches % INCH_BASE)
}

pub fn lbs_to_metric_ton(lbs: f64) -> String {
    format!("{}", lbs / POUND_BASE * SHORT_TON)
}

/* water and land use vocabulary */

pub const FEAT_COD_RIVER: u64 = 500412;
pub const FEAT_COD_CANAL: u64 = 500414;
pub const FEAT_COD_LAKE: u64 = 500421;

pub fn water_poly_tags(feat_cod: u64, name: &str) -> Vec<Tag> {
    let mut tags = vec![tag("type", "multipolygon"), tag("natural", "water")];
    match feat_cod {
        FEAT_COD_RIVER => tags.push(tag("water", "river")),
        FEAT_COD_CANAL => tags.push(tag("water", "canal")),
        FEAT_COD_LAKE => tags.push(tag("water", "lake")),
        _ => {}
    }
    if !name.is_empty() {
        tags.push(tag("name", &to_camel_case_with_spaces(name)));
    }
    tags
}

pub fn water_seg_tags(feat_cod: u64, name: &str) -> Vec<Tag> {
    let waterway = match feat_cod {
        FEAT_COD_RIVER => "river",
        FEAT_COD_CANAL => "canal",
        _ => "stream",
    };
    let mut tags = vec![tag("waterway", waterway)];
    if !name.is_empty() {
        tags.push(tag("name", &to_camel_case_with_spaces(name)));
    }
    tags
}

/// Land-use vocabulary keyed by feature code. Unknown codes yield `None`
/// and the caller skips the feature.
pub fn landuse_tags(feat_cod: u64) -> Option<Vec<(&'static str, &'static str)>> {
    match feat_cod {
        // parks of the various administrations share one rendering
        900103 | 900130 | 900140 | 900156 => Some(vec![("leisure", "park")]),
        900150 => Some(vec![("boundary", "national_park")]),
        509998 => Some(vec![("landuse", "cemetery")]),
        900108 => Some(vec![("landuse", "military")]),
        900132 => Some(vec![("aeroway", "aerodrome")]),
        900134 => Some(vec![("landuse", "retail")]),
        900135 => Some(vec![("leisure", "golf_course")]),
        900136 => Some(vec![("amenity", "hospital")]),
        900137 => Some(vec![("landuse", "industrial")]),
        900138 | 900159 => Some(vec![("amenity", "university")]),
        900144 => Some(vec![("landuse", "railway")]),
        900202 => Some(vec![("natural", "wood")]),
        _ => None,
    }
}
