//! Compiled filename patterns and the generic field extractor.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// A filename regex plus optional group refinements.
///
/// A refinement names a capture group and a secondary regex the captured text
/// must satisfy. Several physical rules can then share one outer shape, e.g.
/// EUV products are science-shaped names whose `inst` group is `euv`.
#[derive(Debug, Clone)]
pub struct NamePattern {
    pub regex: Regex,
    pub refinements: Vec<(&'static str, Regex)>,
}

impl NamePattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
            refinements: Vec::new(),
        })
    }

    /// Require `group` to match `pattern`; a missing group fails the refinement.
    pub fn refine(mut self, group: &'static str, pattern: &str) -> Result<Self, regex::Error> {
        self.refinements.push((group, Regex::new(pattern)?));
        Ok(self)
    }

    pub fn captures<'t>(&self, name: &'t str) -> Option<Captures<'t>> {
        let caps = self.regex.captures(name)?;
        let refined = self.refinements.iter().all(|(group, re)| {
            caps.name(group)
                .map(|m| re.is_match(m.as_str()))
                .unwrap_or(false)
        });
        refined.then_some(caps)
    }

    pub fn matches(&self, name: &str) -> bool {
        self.captures(name).is_some()
    }
}

/// True when any of `names` satisfies `pattern` and its refinements.
pub fn match_names<S: AsRef<str>>(names: &[S], pattern: &NamePattern) -> bool {
    names.iter().any(|name| pattern.matches(name.as_ref()))
}

// ============================================================================
// Field extraction
// ============================================================================

/// A captured value after its transform ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Null,
    Text(String),
    Number(u32),
    /// `hhmmss` split into hours, minutes, seconds
    Clock(u32, u32, u32),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<u32> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

pub type Transform = fn(&str) -> FieldValue;

/// `"001"` → `1`. Unparseable input becomes `Null`.
pub fn to_number(raw: &str) -> FieldValue {
    raw.parse::<u32>()
        .map(FieldValue::Number)
        .unwrap_or(FieldValue::Null)
}

/// `"123456"` → `(12, 34, 56)`.
pub fn to_clock(raw: &str) -> FieldValue {
    if raw.len() != 6 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return FieldValue::Null;
    }
    let part = |i: usize| raw[i..i + 2].parse::<u32>().unwrap_or(0);
    FieldValue::Clock(part(0), part(2), part(4))
}

pub fn to_text(raw: &str) -> FieldValue {
    if raw.is_empty() {
        FieldValue::Null
    } else {
        FieldValue::Text(raw.to_string())
    }
}

/// Apply the first regex in `regexes` that matches `name`, returning `parts`
/// in order. Groups that did not participate or captured nothing are `Null`;
/// other captures go through the transform registered for that part, or
/// [`to_text`] when none is.
pub fn extract(
    regexes: &[&Regex],
    name: &str,
    parts: &[&str],
    transforms: &[(&str, Transform)],
) -> Option<Vec<(String, FieldValue)>> {
    let caps = regexes.iter().find_map(|re| re.captures(name))?;
    let values = parts
        .iter()
        .map(|part| {
            let value = match caps.name(part).map(|m| m.as_str()) {
                None | Some("") => FieldValue::Null,
                Some(raw) => {
                    let transform = transforms
                        .iter()
                        .find(|(key, _)| key == part)
                        .map(|(_, f)| *f)
                        .unwrap_or(to_text as Transform);
                    transform(raw)
                }
            };
            (part.to_string(), value)
        })
        .collect();
    Some(values)
}

// ============================================================================
// Grammar fragments
// ============================================================================

const INST: &str = r"(?P<inst>[a-z0-9]{3})";
const LEVEL: &str = r"(?P<level>l[0-3][a-z]?)";
const DESC: &str = r"(?:_(?P<desc>[a-z0-9][a-z0-9_\-]*?))?";
const DATE_TIME: &str = r"_(?P<date>\d{8})(?:T(?P<time>\d{6}))?";
const VER_REV: &str = r"_v(?P<version>\d{2,3})_r(?P<revision>\d{2,3})";
const GZ: &str = r"(?P<gz>\.gz)?";

fn compile(pattern: String) -> NamePattern {
    NamePattern::new(&pattern).expect("built-in filename pattern must compile")
}

fn refined(pattern: NamePattern, group: &'static str, re: &str) -> NamePattern {
    pattern
        .refine(group, re)
        .expect("built-in refinement pattern must compile")
}

/// `mvn_<inst>_<level>[_<desc>]_<YYYYMMDD>[T<hhmmss>]_v<NN>_r<NN>.<ext>[.gz]`
pub static SCIENCE: Lazy<NamePattern> = Lazy::new(|| {
    compile(format!(
        r"^(?P<root>mvn_{INST}_{LEVEL}{DESC}{DATE_TIME}){VER_REV}\.(?P<ext>[a-z0-9]+){GZ}$"
    ))
});

/// Science-shaped XML label, versioned or not.
pub static LABEL: Lazy<NamePattern> = Lazy::new(|| {
    compile(format!(
        r"^(?P<root>mvn_(?P<inst>[a-z0-9]{{2,3}})_(?P<level>[a-z0-9]+){DESC}{DATE_TIME})(?:{VER_REV})?\.(?P<ext>xml)$"
    ))
});

/// `mvn_kp_<insitu|iuvs>[_<desc>]_<YYYYMMDD>[T<hhmmss>]_v<NN>_r<NN>.tab[.gz]`
pub static KP: Lazy<NamePattern> = Lazy::new(|| {
    compile(format!(
        r"^(?P<root>mvn_kp_(?P<plan>insitu|iuvs){DESC}{DATE_TIME}){VER_REV}\.(?P<ext>tab){GZ}$"
    ))
});

/// `mvn_<inst>_<grouping>_l0_<YYYYMMDD>[_v<NNN>].dat[.gz]`
pub static L0: Lazy<NamePattern> = Lazy::new(|| {
    compile(format!(
        r"^(?P<root>mvn_{INST}_(?P<grouping>[a-z0-9]+)_l0_(?P<date>\d{{8}}))(?:_v(?P<version>\d{{3}}))?\.(?P<ext>dat){GZ}$"
    ))
});

/// `mvn_<inst>_<ql|lN>[_<desc>]_<YYYYMMDD>[_<orbit>].<png|csv>`
pub static QUICKLOOK: Lazy<NamePattern> = Lazy::new(|| {
    compile(format!(
        r"^(?P<root>mvn_{INST}_(?P<level>ql|l[0-3][a-z]?){DESC}_(?P<date>\d{{8}})(?:_(?P<orbit>\d{{5}}))?)\.(?P<ext>png|csv)$"
    ))
});

/// SEP ancillary products share the science shape.
pub static SEP_ANC: Lazy<NamePattern> =
    Lazy::new(|| refined(refined(SCIENCE.clone(), "inst", "^sep$"), "desc", "^anc"));

pub static EUV: Lazy<NamePattern> = Lazy::new(|| refined(SCIENCE.clone(), "inst", "^euv$"));

/// Radio science (RSE) products share the science shape.
pub static RADIO: Lazy<NamePattern> = Lazy::new(|| refined(SCIENCE.clone(), "inst", "^rse$"));

/// `mvn_<inst>_metadata[_<desc>][_<YYYYMMDD>].<txt|csv|json|dat>`
pub static METADATA: Lazy<NamePattern> = Lazy::new(|| {
    compile(format!(
        r"^(?P<root>mvn_{INST}_metadata{DESC}(?:_(?P<date>\d{{8}}))?)\.(?P<ext>txt|csv|json|dat)$"
    ))
});

/// `<src>_<desc>_<YYDDD>[_<YYDDD>][_v<N>].<ext>`
pub static ANCILLARY: Lazy<NamePattern> = Lazy::new(|| {
    compile(
        r"^(?P<root>(?P<source>[a-z]{3})_(?P<desc>[a-z0-9][a-z0-9_]*?)_(?P<yy>\d{2})(?P<doy>\d{3})(?:_(?P<end_yy>\d{2})(?P<end_doy>\d{3}))?)(?:_v(?P<version>\d{1,3}))?\.(?P<ext>drf|sff|orb|eps|txt|dat|csv)$"
            .to_string(),
    )
});

/// `<base>[.<N>].<tls|tsc|tpc|bsp|bc|ti|tf>`
pub static SPICE: Lazy<NamePattern> = Lazy::new(|| {
    compile(
        r"^(?P<root>[A-Za-z0-9][A-Za-z0-9_\-]*?)(?:\.(?P<version>\d+))?\.(?P<ext>tls|tsc|tpc|bsp|bc|ti|tf)$"
            .to_string(),
    )
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_patterns_compile() {
        for pattern in [
            &*SCIENCE, &*LABEL, &*KP, &*L0, &*QUICKLOOK, &*SEP_ANC, &*EUV, &*RADIO, &*METADATA,
            &*ANCILLARY, &*SPICE,
        ] {
            assert!(!pattern.regex.is_match(""), "{}", pattern.regex.as_str());
        }
        assert_eq!(SEP_ANC.refinements.len(), 2);
        assert_eq!(EUV.refinements.len(), 1);
    }

    #[test]
    fn test_refinement_dispatch() {
        let euv = "mvn_euv_l2_bands_20140320_v01_r00.cdf";
        let swe = "mvn_swe_l2_svy3d_20140320_v01_r03.cdf";
        assert!(SCIENCE.matches(euv));
        assert!(EUV.matches(euv));
        assert!(!EUV.matches(swe));
        assert!(match_names(&[swe, euv], &EUV));
        assert!(!match_names(&[swe], &RADIO));
    }

    #[test]
    fn test_extract_applies_transforms() {
        let regexes = [&SCIENCE.regex];
        let values = extract(
            &regexes,
            "mvn_swe_l2_svy3d_20140320T123456_v01_r03.cdf",
            &["inst", "desc", "time", "version", "gz"],
            &[("time", to_clock), ("version", to_number)],
        )
        .unwrap();
        assert_eq!(values[0], ("inst".to_string(), FieldValue::Text("swe".to_string())));
        assert_eq!(values[1].1, FieldValue::Text("svy3d".to_string()));
        assert_eq!(values[2].1, FieldValue::Clock(12, 34, 56));
        assert_eq!(values[3].1, FieldValue::Number(1));
        assert_eq!(values[4].1, FieldValue::Null);
    }

    #[test]
    fn test_extract_tries_regexes_in_order() {
        let first = Regex::new(r"^(?P<a>\d+)x$").unwrap();
        let second = Regex::new(r"^(?P<a>\d+)$").unwrap();
        let values = extract(&[&first, &second], "42", &["a"], &[("a", to_number)]).unwrap();
        assert_eq!(values[0].1, FieldValue::Number(42));
        assert!(extract(&[&first], "42", &["a"], &[]).is_none());
    }
}
