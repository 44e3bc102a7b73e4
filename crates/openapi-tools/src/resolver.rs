//! Local `$ref` inliner.
//!
//! Real-world specs are often published un-bundled, with schemas, parameters and responses shared
//! through `#/components/...` pointers. The `search` tool promises that refs are pre-resolved, so
//! local refs are replaced with the value they point at before the document is exposed.
//!
//! Only same-document refs (`#/...`) are inlined. External refs, refs that point nowhere and refs
//! that would recurse into themselves are left as `$ref` objects; none of these is an error.

use serde_json::Value;
use std::collections::HashMap;

/// Counters reported after an inlining pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InlineStats {
    pub inlined: usize,
    /// External refs and local pointers that resolve to nothing.
    pub unresolved: usize,
    /// Refs left in place because inlining them would recurse forever.
    pub cyclic: usize,
}

/// Inline every resolvable local `$ref` in `root`, in place.
pub fn inline_local_refs(root: &mut Value) -> InlineStats {
    let source = root.clone();
    let mut inliner = Inliner {
        source: &source,
        cache: HashMap::new(),
        stack: Vec::new(),
        stats: InlineStats::default(),
    };
    inliner.walk(root);
    inliner.stats
}

struct Inliner<'a> {
    source: &'a Value,
    /// Fully inlined targets that did not touch a cycle, keyed by ref string.
    cache: HashMap<String, Value>,
    /// Refs currently being expanded.
    stack: Vec<String>,
    stats: InlineStats,
}

enum Resolved {
    Value { value: Value, cyclic: bool },
    Cycle,
    Missing,
}

impl Inliner<'_> {
    /// Returns `true` if a cycle was hit somewhere below `node`.
    fn walk(&mut self, node: &mut Value) -> bool {
        let reference = node
            .as_object()
            .and_then(|m| m.get("$ref"))
            .and_then(Value::as_str)
            .map(str::to_string);

        if let Some(reference) = reference {
            return self.replace_ref(node, &reference);
        }

        match node {
            Value::Object(map) => {
                let mut cyclic = false;
                for value in map.values_mut() {
                    cyclic |= self.walk(value);
                }
                cyclic
            }
            Value::Array(items) => {
                let mut cyclic = false;
                for value in items {
                    cyclic |= self.walk(value);
                }
                cyclic
            }
            _ => false,
        }
    }

    fn replace_ref(&mut self, node: &mut Value, reference: &str) -> bool {
        let Some(pointer) = reference.strip_prefix('#') else {
            self.stats.unresolved += 1;
            return false;
        };

        match self.resolve(reference, pointer) {
            Resolved::Value { value, cyclic } => {
                // Keys next to `$ref` (e.g. `description`) override the target's.
                let siblings: Vec<(String, Value)> = node
                    .as_object()
                    .map(|m| {
                        m.iter()
                            .filter(|(k, _)| k.as_str() != "$ref")
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect()
                    })
                    .unwrap_or_default();

                *node = value;
                if let Value::Object(map) = node {
                    for (k, v) in siblings {
                        map.insert(k, v);
                    }
                }
                self.stats.inlined += 1;
                cyclic
            }
            Resolved::Cycle => {
                self.stats.cyclic += 1;
                true
            }
            Resolved::Missing => {
                self.stats.unresolved += 1;
                false
            }
        }
    }

    fn resolve(&mut self, reference: &str, pointer: &str) -> Resolved {
        if self.stack.iter().any(|r| r == reference) {
            return Resolved::Cycle;
        }
        if let Some(value) = self.cache.get(reference) {
            return Resolved::Value {
                value: value.clone(),
                cyclic: false,
            };
        }
        let Some(target) = self.source.pointer(pointer) else {
            return Resolved::Missing;
        };

        let mut value = target.clone();
        self.stack.push(reference.to_string());
        let cyclic = self.walk(&mut value);
        self.stack.pop();

        if !cyclic {
            self.cache.insert(reference.to_string(), value.clone());
        }
        Resolved::Value { value, cyclic }
    }
}
