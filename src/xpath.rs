//! Compiled path expressions with a thread-safe reuse pool.
//!
//! The protocol evaluates a small fixed set of absolute paths (for example
//! `/head:AppHdr/head:Sgntr/ds:Signature`) on every sign or validate call.
//! Compiled expressions carry a reusable traversal scratch buffer, so an
//! instance must not be evaluated by two threads at once; instead of
//! compiling afresh per call, instances are parked in a per-path pool and
//! borrowed for the duration of one evaluation. The factory that compiles
//! new expressions is serialized behind its own lock; evaluation never
//! holds it.

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::warn;

use crate::constants::{NS_ISO_HEAD, NS_XMLDSIG, PREFIX_DSIG, PREFIX_HEAD};
use crate::dom::{Element, NodePath, XmlNode};
use crate::error::{Error, Result};

/// One step of a compiled path: a resolved namespace plus a local name.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    namespace: String,
    name: String,
}

/// A compiled absolute path expression.
///
/// Evaluation reuses `frames` across calls; that statefulness is why
/// instances live in a pool instead of being shared.
#[derive(Debug)]
pub struct CompiledPath {
    steps: Vec<Step>,
    frames: Vec<Frame>,
}

/// DFS frame: depth into `steps` plus the child index cursor at that depth.
#[derive(Debug, Clone, Copy)]
struct Frame {
    depth: usize,
    child: usize,
}

impl CompiledPath {
    /// Find every node matched by this path, as child index paths from
    /// `root`, in document order. The first step must match `root` itself.
    fn evaluate(&mut self, root: &Element) -> Vec<NodePath> {
        let mut results = Vec::new();
        if !step_matches(root, &self.steps[0]) {
            return results;
        }
        if self.steps.len() == 1 {
            results.push(Vec::new());
            return results;
        }

        self.frames.clear();
        self.frames.push(Frame { depth: 1, child: 0 });
        let mut path: NodePath = Vec::new();

        'outer: while let Some(&Frame { depth, child }) = self.frames.last() {
            let parent = match crate::dom::node_at(root, &path) {
                Some(p) => p,
                None => break,
            };
            let mut cursor = child;
            while cursor < parent.children.len() {
                let index = cursor;
                cursor += 1;
                if let XmlNode::Element(e) = &parent.children[index] {
                    if step_matches(e, &self.steps[depth]) {
                        if depth + 1 == self.steps.len() {
                            let mut hit = path.clone();
                            hit.push(index);
                            results.push(hit);
                        } else {
                            let top = self.frames.len() - 1;
                            self.frames[top].child = cursor;
                            path.push(index);
                            self.frames.push(Frame {
                                depth: depth + 1,
                                child: 0,
                            });
                            continue 'outer;
                        }
                    }
                }
            }
            self.frames.pop();
            path.pop();
        }
        results
    }
}

fn step_matches(el: &Element, step: &Step) -> bool {
    el.namespace.as_deref() == Some(step.namespace.as_str()) && el.name == step.name
}

/// Compiles path strings against the fixed internal prefix bindings.
#[derive(Debug)]
struct PathCompiler {
    bindings: Vec<(&'static str, &'static str)>,
}

impl PathCompiler {
    fn new() -> Self {
        PathCompiler {
            bindings: vec![(PREFIX_HEAD, NS_ISO_HEAD), (PREFIX_DSIG, NS_XMLDSIG)],
        }
    }

    fn compile(&self, path: &str) -> Result<CompiledPath> {
        let rest = path.strip_prefix('/').ok_or_else(|| {
            Error::Configuration(format!("invalid path (must be absolute): {path}"))
        })?;
        let mut steps = Vec::new();
        for part in rest.split('/') {
            let (prefix, name) = part.split_once(':').ok_or_else(|| {
                Error::Configuration(format!("invalid path step (missing prefix): {part}"))
            })?;
            if name.is_empty() {
                return Err(Error::Configuration(format!("invalid path step: {part}")));
            }
            let namespace = self
                .bindings
                .iter()
                .find(|(p, _)| *p == prefix)
                .map(|(_, ns)| *ns)
                .ok_or_else(|| {
                    Error::Configuration(format!("unknown namespace prefix: {prefix}"))
                })?;
            steps.push(Step {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }
        if steps.is_empty() {
            return Err(Error::Configuration(format!("empty path: {path}")));
        }
        Ok(CompiledPath {
            steps,
            frames: Vec::new(),
        })
    }
}

/// Shared, concurrency-safe cache of compiled path expressions.
///
/// Build one per process (or per [`crate::SignerVerifier`]) and share it by
/// reference; entries are created lazily and live for the lifetime of the
/// pool. The pools are intentionally unbounded: under contention a fresh
/// instance is compiled rather than blocking the caller, and churn is
/// bounded by peak concurrent callers because the expression set is fixed
/// and small.
#[derive(Debug)]
pub struct ExpressionPool {
    pools: DashMap<String, Mutex<Vec<CompiledPath>>>,
    factory: Mutex<PathCompiler>,
}

impl ExpressionPool {
    pub fn new() -> Self {
        ExpressionPool {
            pools: DashMap::new(),
            factory: Mutex::new(PathCompiler::new()),
        }
    }

    /// Find every node matching `path`, in document order.
    pub fn find_nodes(&self, path: &str, root: &Element) -> Result<Vec<NodePath>> {
        let cached = {
            let entry = self
                .pools
                .entry(path.to_string())
                .or_insert_with(|| Mutex::new(Vec::new()));
            let popped = entry.lock().pop();
            popped
        };
        let mut expr = match cached {
            Some(expr) => expr,
            // Only the creation step holds the factory lock; the compiled
            // instance is evaluated without it.
            None => self.factory.lock().compile(path)?,
        };

        let results = expr.evaluate(root);

        match self.pools.get(path) {
            Some(pool) => pool.lock().push(expr),
            // Entries are never removed, so this is unreachable in
            // practice; losing the instance only costs a recompile.
            None => warn!(path, "expression pool entry vanished; dropping instance"),
        }
        Ok(results)
    }

    /// Find a single node. `Ok(None)` when absent; more than one match is a
    /// structural error.
    pub fn find_node(&self, path: &str, root: &Element) -> Result<Option<NodePath>> {
        let mut nodes = self.find_nodes(path, root)?;
        match nodes.len() {
            0 => Ok(None),
            1 => Ok(Some(nodes.remove(0))),
            n => Err(Error::Structural(format!(
                "multiple \"{path}\" nodes were found: {n}"
            ))),
        }
    }

    /// Find a node that must exist exactly once.
    pub fn find_required_node(&self, path: &str, root: &Element) -> Result<NodePath> {
        self.find_node(path, root)?
            .ok_or_else(|| Error::Structural(format!("the \"{path}\" node was not found")))
    }

    /// Compile-check a path, caching the instance for later evaluation.
    /// Lets startup surface configuration errors before the first call.
    pub fn prepare(&self, path: &str) -> Result<()> {
        let compiled = self.factory.lock().compile(path)?;
        self.pools
            .entry(path.to_string())
            .or_insert_with(|| Mutex::new(Vec::new()))
            .lock()
            .push(compiled);
        Ok(())
    }
}

impl Default for ExpressionPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{XPATH_SIGNATURE_ENV, XPATH_SIGNATURE_NODE};
    use crate::dom::node_at;
    use std::sync::Arc;

    const HEADER: &str = concat!(
        r#"<AppHdr xmlns="urn:iso:std:iso:20022:tech:xsd:head.001.001.03">"#,
        r#"<Fr>a</Fr><To>b</To>"#,
        r#"<Sgntr><Signature xmlns="http://www.w3.org/2000/09/xmldsig#">x</Signature></Sgntr>"#,
        r#"</AppHdr>"#,
    );

    #[test]
    fn evaluates_fixed_paths() {
        let root = Element::parse_str(HEADER).unwrap();
        let pool = ExpressionPool::new();
        let env = pool.find_required_node(XPATH_SIGNATURE_ENV, &root).unwrap();
        assert_eq!(node_at(&root, &env).unwrap().name, "Sgntr");
        let sig = pool.find_required_node(XPATH_SIGNATURE_NODE, &root).unwrap();
        assert_eq!(node_at(&root, &sig).unwrap().name, "Signature");
    }

    #[test]
    fn absent_node_is_none_and_required_is_error() {
        let xml = r#"<AppHdr xmlns="urn:iso:std:iso:20022:tech:xsd:head.001.001.03"><Fr>a</Fr></AppHdr>"#;
        let root = Element::parse_str(xml).unwrap();
        let pool = ExpressionPool::new();
        assert!(pool.find_node(XPATH_SIGNATURE_ENV, &root).unwrap().is_none());
        assert!(matches!(
            pool.find_required_node(XPATH_SIGNATURE_ENV, &root),
            Err(Error::Structural(_))
        ));
    }

    #[test]
    fn multiple_matches_are_structural_for_find_node() {
        let xml = concat!(
            r#"<AppHdr xmlns="urn:iso:std:iso:20022:tech:xsd:head.001.001.03">"#,
            r#"<Sgntr/><Sgntr/></AppHdr>"#,
        );
        let root = Element::parse_str(xml).unwrap();
        let pool = ExpressionPool::new();
        let all = pool.find_nodes(XPATH_SIGNATURE_ENV, &root).unwrap();
        assert_eq!(all, vec![vec![0], vec![1]]);
        assert!(matches!(
            pool.find_node(XPATH_SIGNATURE_ENV, &root),
            Err(Error::Structural(_))
        ));
    }

    #[test]
    fn namespace_mismatch_does_not_match() {
        let xml = r#"<AppHdr xmlns="urn:other"><Sgntr/></AppHdr>"#;
        let root = Element::parse_str(xml).unwrap();
        let pool = ExpressionPool::new();
        assert!(pool.find_nodes(XPATH_SIGNATURE_ENV, &root).unwrap().is_empty());
    }

    #[test]
    fn unknown_prefix_is_configuration_error() {
        let root = Element::parse_str("<a/>").unwrap();
        let pool = ExpressionPool::new();
        assert!(matches!(
            pool.find_nodes("/nope:AppHdr", &root),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn pool_reuses_compiled_instances() {
        let root = Element::parse_str(HEADER).unwrap();
        let pool = ExpressionPool::new();
        pool.find_nodes(XPATH_SIGNATURE_ENV, &root).unwrap();
        pool.find_nodes(XPATH_SIGNATURE_ENV, &root).unwrap();
        let entry = pool.pools.get(XPATH_SIGNATURE_ENV).unwrap();
        assert_eq!(entry.lock().len(), 1);
    }

    #[test]
    fn concurrent_evaluation_is_independent() {
        let pool = Arc::new(ExpressionPool::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let pool = Arc::clone(&pool);
            handles.push(std::thread::spawn(move || {
                let root = Element::parse_str(HEADER).unwrap();
                for _ in 0..100 {
                    if i == 0 {
                        // One caller keeps failing; the pool must stay
                        // usable for everyone else.
                        assert!(pool.find_nodes("/bad:Path", &root).is_err());
                    } else {
                        let found = pool.find_nodes(XPATH_SIGNATURE_NODE, &root).unwrap();
                        assert_eq!(found, vec![vec![2, 0]]);
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        let root = Element::parse_str(HEADER).unwrap();
        assert_eq!(
            pool.find_nodes(XPATH_SIGNATURE_NODE, &root).unwrap(),
            vec![vec![2, 0]]
        );
    }
}
