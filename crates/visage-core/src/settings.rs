use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Synthesis parameters, fixed at task creation.
///
/// Built once at the submission boundary from the flat string-keyed form
/// map; the rest of the system only ever sees the typed fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub size: u32,
    pub preprocess: String,
    pub pose_style: i32,
    pub expression_scale: f64,
    pub batch_size: u32,
    pub enhancer: Option<String>,
    pub background_enhancer: Option<String>,
    pub still_mode: bool,
    pub face3dvis: bool,
    pub verbose: bool,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            size: 256,
            preprocess: "crop".into(),
            pose_style: 0,
            expression_scale: 1.0,
            batch_size: 2,
            enhancer: None,
            background_enhancer: None,
            still_mode: false,
            face3dvis: false,
            verbose: false,
        }
    }
}

impl GenerationSettings {
    /// Coerce a flat string-keyed field map into typed settings.
    ///
    /// Values are loosely typed on the wire: boolean-like, integer-like,
    /// float-like, or plain strings. A value that fails to parse for its
    /// field leaves the default in place. Returns the settings plus the
    /// keys that were not recognized, so the caller can log them.
    pub fn from_fields(fields: &HashMap<String, String>) -> (Self, Vec<String>) {
        let mut settings = Self::default();
        let mut unknown = Vec::new();

        for (key, value) in fields {
            match key.as_str() {
                "size" => parse_into(value, &mut settings.size),
                "preprocess" => settings.preprocess = value.clone(),
                "pose_style" => parse_into(value, &mut settings.pose_style),
                "expression_scale" => parse_into(value, &mut settings.expression_scale),
                "batch_size" => parse_into(value, &mut settings.batch_size),
                "enhancer" => settings.enhancer = non_empty(value),
                "background_enhancer" => settings.background_enhancer = non_empty(value),
                "still_mode" => settings.still_mode = truthy(value),
                "face3dvis" => settings.face3dvis = truthy(value),
                "verbose" => settings.verbose = truthy(value),
                _ => unknown.push(key.clone()),
            }
        }

        unknown.sort();
        (settings, unknown)
    }
}

fn parse_into<T: std::str::FromStr>(value: &str, slot: &mut T) {
    if let Ok(parsed) = value.trim().parse() {
        *slot = parsed;
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

fn truthy(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true") || value.trim() == "1"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_match_worker_contract() {
        let s = GenerationSettings::default();
        assert_eq!(s.size, 256);
        assert_eq!(s.preprocess, "crop");
        assert_eq!(s.pose_style, 0);
        assert_eq!(s.expression_scale, 1.0);
        assert_eq!(s.batch_size, 2);
        assert!(s.enhancer.is_none());
        assert!(!s.still_mode);
    }

    #[test]
    fn empty_map_yields_defaults() {
        let (s, unknown) = GenerationSettings::from_fields(&HashMap::new());
        assert_eq!(s, GenerationSettings::default());
        assert!(unknown.is_empty());
    }

    #[test]
    fn coerces_typed_values() {
        let (s, unknown) = GenerationSettings::from_fields(&fields(&[
            ("size", "512"),
            ("preprocess", "full"),
            ("pose_style", "12"),
            ("expression_scale", "1.5"),
            ("batch_size", "4"),
            ("enhancer", "gfpgan"),
            ("still_mode", "true"),
            ("verbose", "TRUE"),
        ]));
        assert_eq!(s.size, 512);
        assert_eq!(s.preprocess, "full");
        assert_eq!(s.pose_style, 12);
        assert_eq!(s.expression_scale, 1.5);
        assert_eq!(s.batch_size, 4);
        assert_eq!(s.enhancer.as_deref(), Some("gfpgan"));
        assert!(s.still_mode);
        assert!(s.verbose);
        assert!(unknown.is_empty());
    }

    #[test]
    fn unparseable_value_keeps_default() {
        let (s, _) = GenerationSettings::from_fields(&fields(&[
            ("size", "huge"),
            ("expression_scale", "not-a-float"),
        ]));
        assert_eq!(s.size, 256);
        assert_eq!(s.expression_scale, 1.0);
    }

    #[test]
    fn unknown_keys_are_surfaced_not_fatal() {
        let (s, unknown) = GenerationSettings::from_fields(&fields(&[
            ("size", "512"),
            ("zz_experimental", "on"),
            ("aa_legacy", "1"),
        ]));
        assert_eq!(s.size, 512);
        assert_eq!(unknown, vec!["aa_legacy".to_string(), "zz_experimental".to_string()]);
    }

    #[test]
    fn false_like_flags_stay_off() {
        let (s, _) = GenerationSettings::from_fields(&fields(&[
            ("still_mode", "false"),
            ("face3dvis", "0"),
            ("verbose", "no"),
        ]));
        assert!(!s.still_mode);
        // "0" is not truthy
        assert!(!s.face3dvis);
        assert!(!s.verbose);
    }

    #[test]
    fn one_is_truthy() {
        let (s, _) = GenerationSettings::from_fields(&fields(&[("still_mode", "1")]));
        assert!(s.still_mode);
    }

    #[test]
    fn blank_enhancer_means_absent() {
        let (s, _) = GenerationSettings::from_fields(&fields(&[("enhancer", "  ")]));
        assert!(s.enhancer.is_none());
    }

    #[test]
    fn serde_roundtrip_with_partial_json() {
        let s: GenerationSettings = serde_json::from_str(r#"{"size": 512}"#).unwrap();
        assert_eq!(s.size, 512);
        assert_eq!(s.batch_size, 2);
    }
}
