//! Pattern compilation for a single route (§4.4 "Pattern compilation").
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A compiled, anchored path pattern. `:name` segments become single-segment
/// captures; every other segment must match literally.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub raw: String,
    segments: Vec<Segment>,
    pub param_names: Vec<String>,
}

impl CompiledPattern {
    pub fn compile(pattern: &str) -> Self {
        let mut segments = Vec::new();
        let mut param_names = Vec::new();
        for part in pattern.split('/').filter(|s| !s.is_empty()) {
            if let Some(name) = part.strip_prefix(':') {
                param_names.push(name.to_string());
                segments.push(Segment::Param(name.to_string()));
            } else {
                segments.push(Segment::Literal(part.to_string()));
            }
        }
        Self {
            raw: pattern.to_string(),
            segments,
            param_names,
        }
    }

    /// Matches `path` against this pattern, anchored start-to-end, returning
    /// the captured parameters (§3 invariant c: one capture per `:name`).
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if path_segments.len() != self.segments.len() {
            return None;
        }
        let mut params = HashMap::new();
        for (pattern_seg, path_seg) in self.segments.iter().zip(path_segments.iter()) {
            match pattern_seg {
                Segment::Literal(lit) => {
                    if lit != path_seg {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    params.insert(name.clone(), path_seg.to_string());
                }
            }
        }
        Some(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_pattern_matches_exactly() {
        let p = CompiledPattern::compile("/hello/world");
        assert!(p.matches("/hello/world").is_some());
        assert!(p.matches("/hello").is_none());
        assert!(p.matches("/hello/world/extra").is_none());
    }

    #[test]
    fn param_segment_captures_value() {
        let p = CompiledPattern::compile("/users/:id");
        let params = p.matches("/users/123").unwrap();
        assert_eq!(params.get("id"), Some(&"123".to_string()));
    }

    #[test]
    fn multiple_params_in_left_to_right_order() {
        let p = CompiledPattern::compile("/teams/:team/users/:id");
        assert_eq!(p.param_names, vec!["team".to_string(), "id".to_string()]);
        let params = p.matches("/teams/acme/users/7").unwrap();
        assert_eq!(params.get("team"), Some(&"acme".to_string()));
        assert_eq!(params.get("id"), Some(&"7".to_string()));
    }
}
