//! Test/production statement classification
//!
//! Walks the syntax tree of one Python file and attributes every counted
//! construct to test or production code. A construct is test code when it is
//! a test-framework import, a `TestCase` subclass, a `test_` function, or
//! anything nested inside one of the latter two.
//!
//! Counted constructs are imports, class definitions, function definitions,
//! assignments, calls and expression statements. Everything else (control
//! flow, returns, augmented or annotated assignments, async functions) is
//! walked through without being counted itself.

use log::trace;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;
use tree_sitter::{Node, Parser};

use crate::error::{MiningError, MiningResult};

/// Test frameworks recognised when no list is configured
pub const DEFAULT_TEST_MODULES: &[&str] = &["unittest", "pytest", "nose2"];

/// Per-file classification result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementCounts {
    pub test_statements: u64,
    pub production_statements: u64,
    /// Top-level packages of imported test frameworks
    pub test_imports: BTreeSet<String>,
    pub test_classes: Vec<String>,
    pub test_functions: Vec<String>,
}

impl StatementCounts {
    /// True when no test framework import, class or function was seen
    pub fn has_no_test_evidence(&self) -> bool {
        self.test_imports.is_empty() && self.test_classes.is_empty() && self.test_functions.is_empty()
    }
}

/// Classifies Python source files. Holds a parser, so one instance per thread.
pub struct StatementClassifier {
    parser: Parser,
    test_modules: HashSet<String>,
}

impl StatementClassifier {
    pub fn new<I, S>(test_modules: I) -> MiningResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .map_err(|e| MiningError::configuration(format!("Python grammar unavailable: {}", e)))?;

        Ok(Self {
            parser,
            test_modules: test_modules.into_iter().map(Into::into).collect(),
        })
    }

    /// Classifier with the default test-module set
    pub fn with_default_modules() -> MiningResult<Self> {
        Self::new(DEFAULT_TEST_MODULES.iter().copied())
    }

    /// Read and classify a file. Undecodable or unparsable files are errors.
    pub fn classify_file(&mut self, path: &Path) -> MiningResult<StatementCounts> {
        let bytes = fs::read(path)?;
        let source = String::from_utf8(bytes)
            .map_err(|e| MiningError::parse(path, format!("not valid UTF-8: {}", e.utf8_error())))?;
        self.classify_source(&source).map_err(|message| MiningError::parse(path, message))
    }

    /// Classify source text, returning a description of the syntax error on failure
    pub fn classify_source(&mut self, source: &str) -> Result<StatementCounts, String> {
        let source = source.strip_prefix('\u{feff}').unwrap_or(source);
        let tree = self
            .parser
            .parse(source, None)
            .ok_or_else(|| "parser produced no tree".to_string())?;

        let root = tree.root_node();
        if root.has_error() {
            return Err(describe_syntax_error(root));
        }

        let mut visit = Visit {
            source: source.as_bytes(),
            test_modules: &self.test_modules,
            in_test_context: false,
            counts: StatementCounts::default(),
        };
        visit.run(root);
        Ok(visit.counts)
    }
}

enum Step<'tree> {
    Enter(Node<'tree>),
    Restore(bool),
}

/// State for one file; discarded when the file is done
struct Visit<'a> {
    source: &'a [u8],
    test_modules: &'a HashSet<String>,
    in_test_context: bool,
    counts: StatementCounts,
}

impl<'a> Visit<'a> {
    fn run(&mut self, root: Node<'_>) {
        let mut stack = vec![Step::Enter(root)];

        while let Some(step) = stack.pop() {
            let node = match step {
                Step::Restore(previous) => {
                    self.in_test_context = previous;
                    continue;
                }
                Step::Enter(node) => node,
            };

            match node.kind() {
                "decorated_definition" => {
                    // Decorators are visited with the definition they belong to
                    if let Some(definition) = node.child_by_field_name("definition") {
                        stack.push(Step::Enter(definition));
                    }
                    continue;
                }
                "class_definition" => {
                    stack.push(Step::Restore(self.in_test_context));
                    if self.is_test_class(node) {
                        self.counts.test_statements += 1;
                        self.counts.test_classes.push(self.name_of(node));
                        self.in_test_context = true;
                    } else {
                        self.count_production_outside_test();
                    }
                    push_children(&mut stack, node, true);
                    continue;
                }
                "function_definition" => {
                    if is_async(node) {
                        push_children(&mut stack, node, true);
                        continue;
                    }
                    stack.push(Step::Restore(self.in_test_context));
                    let name = self.name_of(node);
                    if name.starts_with("test_") {
                        self.counts.test_statements += 1;
                        self.counts.test_functions.push(name);
                        self.in_test_context = true;
                    } else {
                        self.count_production_outside_test();
                    }
                    push_children(&mut stack, node, true);
                    continue;
                }
                "import_statement" => self.visit_import(node),
                "import_from_statement" => self.visit_import_from(node),
                "expression_statement" => {
                    let wraps_assignment = node
                        .named_child(0)
                        .is_some_and(|child| matches!(child.kind(), "assignment" | "augmented_assignment"));
                    if !wraps_assignment {
                        self.count_by_context();
                    }
                }
                "assignment" => {
                    let is_plain = node.child_by_field_name("right").is_some()
                        && node.child_by_field_name("type").is_none()
                        && !matches!(node.parent(), Some(parent) if parent.kind() == "assignment");
                    if is_plain {
                        self.count_by_context();
                    }
                }
                "call" => self.count_by_context(),
                _ => {}
            }

            push_children(&mut stack, node, false);
        }
    }

    fn count_by_context(&mut self) {
        if self.in_test_context {
            self.counts.test_statements += 1;
        } else {
            self.counts.production_statements += 1;
        }
    }

    fn count_production_outside_test(&mut self) {
        if !self.in_test_context {
            self.counts.production_statements += 1;
        }
    }

    fn visit_import(&mut self, node: Node<'_>) {
        let mut cursor = node.walk();
        let names: Vec<Node<'_>> = node.children_by_field_name("name", &mut cursor).collect();

        for name_node in names {
            let dotted = match name_node.kind() {
                "aliased_import" => name_node.child_by_field_name("name").map(|n| self.text(n)),
                _ => Some(self.text(name_node)),
            };
            let Some(dotted) = dotted else { continue };

            let package = top_level_package(&dotted);
            if self.test_modules.contains(package) {
                trace!("Test framework import: {}", dotted);
                self.counts.test_statements += 1;
                self.counts.test_imports.insert(package.to_string());
            } else if !self.in_test_context {
                self.counts.production_statements += 1;
            }
        }
    }

    /// `from x import y` is recorded as framework evidence but not counted
    fn visit_import_from(&mut self, node: Node<'_>) {
        let Some(module) = node.child_by_field_name("module_name") else { return };
        if module.kind() == "relative_import" {
            return;
        }
        let dotted = self.text(module);
        let package = top_level_package(&dotted);
        if self.test_modules.contains(package) {
            self.counts.test_imports.insert(package.to_string());
        }
    }

    fn is_test_class(&self, node: Node<'_>) -> bool {
        let Some(superclasses) = node.child_by_field_name("superclasses") else {
            return false;
        };
        let mut cursor = superclasses.walk();
        let found = superclasses.named_children(&mut cursor).any(|base| match base.kind() {
            "identifier" => self.text(base) == "TestCase",
            "attribute" => base
                .child_by_field_name("attribute")
                .is_some_and(|attr| self.text(attr) == "TestCase"),
            _ => false,
        });
        found
    }

    fn name_of(&self, node: Node<'_>) -> String {
        node.child_by_field_name("name")
            .map(|n| self.text(n))
            .unwrap_or_default()
    }

    fn text(&self, node: Node<'_>) -> String {
        node.utf8_text(self.source).unwrap_or_default().to_string()
    }
}

/// Queue a node's children so they are visited in source order.
/// Definitions also pick up the decorators of an enclosing `decorated_definition`.
fn push_children<'tree>(stack: &mut Vec<Step<'tree>>, node: Node<'tree>, with_decorators: bool) {
    let mut children: Vec<Node<'tree>> = Vec::new();

    if with_decorators {
        if let Some(parent) = node.parent().filter(|p| p.kind() == "decorated_definition") {
            let mut parent_cursor = parent.walk();
            children.extend(
                parent
                    .named_children(&mut parent_cursor)
                    .filter(|child| child.kind() == "decorator"),
            );
        }
    }

    let mut cursor = node.walk();
    children.extend(node.children(&mut cursor));

    stack.extend(children.into_iter().rev().map(Step::Enter));
}

fn is_async(node: Node<'_>) -> bool {
    node.child(0).is_some_and(|first| first.kind() == "async")
}

fn top_level_package(dotted: &str) -> &str {
    dotted.split('.').next().unwrap_or(dotted).trim()
}

fn describe_syntax_error(root: Node<'_>) -> String {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            let position = node.start_position();
            return format!("invalid syntax at line {}, column {}", position.row + 1, position.column + 1);
        }
        if node.has_error() {
            let mut cursor = node.walk();
            let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
            stack.extend(children.into_iter().rev());
        }
    }
    "invalid syntax".to_string()
}
