//! Read-only traversal of the tree.
//!
//! Each `visit_*` method defaults to the matching `walk_*` function, which visits the children in
//! evaluation order. Override a method to observe a node and call the walk function to keep
//! descending.
//!
//! ```
//! use pysst::{Node, NodeKind, visit::{Visitor, walk_node}};
//!
//! struct CountNames(usize);
//!
//! impl<'a> Visitor<'a> for CountNames {
//!     fn visit_node(&mut self, node: &'a Node) {
//!         if matches!(node.kind, NodeKind::Name(_)) {
//!             self.0 += 1;
//!         }
//!         walk_node(self, node);
//!     }
//! }
//!
//! let module = pysst::build("a = b + c\n").unwrap();
//! let mut counter = CountNames(0);
//! counter.visit_node(&module.body);
//! assert_eq!(counter.0, 3);
//! ```

use crate::{
    args::ArgDefs,
    span::Span,
    sst::{ClassDef, Comprehension, FStringPart, FunctionDef, Lambda, Node, NodeKind},
};

pub trait Visitor<'a>: Sized {
    fn visit_node(&mut self, node: &'a Node) {
        walk_node(self, node);
    }

    /// Called for the definition; the body is visited by [`walk_function_def`].
    fn visit_function_def(&mut self, function: &'a FunctionDef) {
        walk_function_def(self, function);
    }

    fn visit_class_def(&mut self, class: &'a ClassDef) {
        walk_class_def(self, class);
    }

    fn visit_lambda(&mut self, lambda: &'a Lambda) {
        walk_lambda(self, lambda);
    }

    fn visit_comprehension(&mut self, comprehension: &'a Comprehension) {
        walk_comprehension(self, comprehension);
    }

    /// Defaults and annotations of a parameter list.
    fn visit_args(&mut self, args: &'a ArgDefs) {
        walk_args(self, args);
    }
}

pub fn walk_args<'a, V: Visitor<'a>>(visitor: &mut V, args: &'a ArgDefs) {
    for arg in args.iter() {
        if let Some(default) = &arg.default {
            visitor.visit_node(default);
        }
    }
    for arg in args.iter() {
        if let Some(annotation) = &arg.annotation {
            visitor.visit_node(annotation);
        }
    }
}

pub fn walk_function_def<'a, V: Visitor<'a>>(visitor: &mut V, function: &'a FunctionDef) {
    for decorator in &function.decorators {
        visitor.visit_node(decorator);
    }
    visitor.visit_args(&function.params);
    if let Some(returns) = &function.returns {
        visitor.visit_node(returns);
    }
    visitor.visit_node(&function.body);
}

pub fn walk_class_def<'a, V: Visitor<'a>>(visitor: &mut V, class: &'a ClassDef) {
    for decorator in &class.decorators {
        visitor.visit_node(decorator);
    }
    for base in &class.bases {
        visitor.visit_node(base);
    }
    for keyword in &class.keywords {
        visitor.visit_node(&keyword.value);
    }
    visitor.visit_node(&class.body);
}

pub fn walk_lambda<'a, V: Visitor<'a>>(visitor: &mut V, lambda: &'a Lambda) {
    visitor.visit_args(&lambda.params);
    visitor.visit_node(&lambda.body);
}

pub fn walk_comprehension<'a, V: Visitor<'a>>(visitor: &mut V, comprehension: &'a Comprehension) {
    for generator in &comprehension.generators {
        visitor.visit_node(&generator.iter);
        visitor.visit_node(&generator.target);
        for condition in &generator.conditions {
            visitor.visit_node(condition);
        }
    }
    visitor.visit_node(&comprehension.element);
    if let Some(value) = &comprehension.value {
        visitor.visit_node(value);
    }
}

fn walk_fstring_parts<'a, V: Visitor<'a>>(visitor: &mut V, parts: &'a [FStringPart]) {
    for part in parts {
        if let FStringPart::Interpolation {
            value, format_spec, ..
        } = part
        {
            visitor.visit_node(value);
            if let Some(spec) = format_spec {
                walk_fstring_parts(visitor, spec);
            }
        }
    }
}

fn walk_all<'a, V: Visitor<'a>>(visitor: &mut V, nodes: &'a [Node]) {
    for node in nodes {
        visitor.visit_node(node);
    }
}

fn walk_opt<'a, V: Visitor<'a>>(visitor: &mut V, node: Option<&'a Node>) {
    if let Some(node) = node {
        visitor.visit_node(node);
    }
}

/// Visits every direct child of `node`.
pub fn walk_node<'a, V: Visitor<'a>>(visitor: &mut V, node: &'a Node) {
    match &node.kind {
        NodeKind::Block { body, .. } => walk_all(visitor, body),
        NodeKind::Expr(value)
        | NodeKind::Starred(value)
        | NodeKind::Await(value)
        | NodeKind::Unary { operand: value, .. }
        | NodeKind::Named { value, .. }
        | NodeKind::Attribute { value, .. }
        | NodeKind::Spill { value, .. } => visitor.visit_node(value),
        NodeKind::Assign { targets, value } => {
            visitor.visit_node(value);
            walk_all(visitor, targets);
        }
        NodeKind::AugAssign { target, value, .. } => {
            visitor.visit_node(target);
            visitor.visit_node(value);
        }
        NodeKind::AnnAssign {
            target,
            annotation,
            value,
        } => {
            walk_opt(visitor, value.as_deref());
            visitor.visit_node(annotation);
            visitor.visit_node(target);
        }
        NodeKind::Del { targets } => walk_all(visitor, targets),
        NodeKind::Return { value } => walk_opt(visitor, value.as_deref()),
        NodeKind::Raise { exc, cause } => {
            walk_opt(visitor, exc.as_deref());
            walk_opt(visitor, cause.as_deref());
        }
        NodeKind::Assert { test, msg } => {
            visitor.visit_node(test);
            walk_opt(visitor, msg.as_deref());
        }
        NodeKind::If { test, body, orelse, .. } | NodeKind::While { test, body, orelse, .. } => {
            visitor.visit_node(test);
            visitor.visit_node(body);
            walk_opt(visitor, orelse.as_deref());
        }
        NodeKind::For {
            target,
            iter,
            body,
            orelse,
            ..
        } => {
            visitor.visit_node(iter);
            visitor.visit_node(target);
            visitor.visit_node(body);
            walk_opt(visitor, orelse.as_deref());
        }
        NodeKind::Try {
            body,
            handlers,
            orelse,
            finally,
            ..
        } => {
            visitor.visit_node(body);
            for handler in handlers {
                walk_opt(visitor, handler.test.as_ref());
                visitor.visit_node(&handler.body);
            }
            walk_opt(visitor, orelse.as_deref());
            walk_opt(visitor, finally.as_deref());
        }
        NodeKind::With { items, body, .. } => {
            for item in items {
                visitor.visit_node(&item.context);
                walk_opt(visitor, item.target.as_ref());
            }
            visitor.visit_node(body);
        }
        NodeKind::FunctionDef(function) => visitor.visit_function_def(function),
        NodeKind::ClassDef(class) => visitor.visit_class_def(class),
        NodeKind::Lambda(lambda) => visitor.visit_lambda(lambda),
        NodeKind::Comprehension(comprehension) => visitor.visit_comprehension(comprehension),
        NodeKind::BoolOp { values, .. } => walk_all(visitor, values),
        NodeKind::BinOp { left, right, .. } => {
            visitor.visit_node(left);
            visitor.visit_node(right);
        }
        NodeKind::Compare { left, comparators, .. } => {
            visitor.visit_node(left);
            walk_all(visitor, comparators);
        }
        NodeKind::Ternary { test, body, orelse } => {
            visitor.visit_node(test);
            visitor.visit_node(body);
            visitor.visit_node(orelse);
        }
        NodeKind::Call { func, args, keywords } => {
            visitor.visit_node(func);
            walk_all(visitor, args);
            for keyword in keywords {
                visitor.visit_node(&keyword.value);
            }
        }
        NodeKind::Subscript { value, index } => {
            visitor.visit_node(value);
            visitor.visit_node(index);
        }
        NodeKind::Slice { lower, upper, step } => {
            walk_opt(visitor, lower.as_deref());
            walk_opt(visitor, upper.as_deref());
            walk_opt(visitor, step.as_deref());
        }
        NodeKind::Collection { elements, .. } => walk_all(visitor, elements),
        NodeKind::Dict { entries } => {
            for entry in entries {
                walk_opt(visitor, entry.key.as_ref());
                visitor.visit_node(&entry.value);
            }
        }
        NodeKind::Yield { value, .. } => walk_opt(visitor, value.as_deref()),
        NodeKind::FString(parts) => walk_fstring_parts(visitor, parts),
        NodeKind::Import { .. }
        | NodeKind::ImportFrom { .. }
        | NodeKind::Global { .. }
        | NodeKind::Nonlocal { .. }
        | NodeKind::Simple(_)
        | NodeKind::Name(_)
        | NodeKind::Int(_)
        | NodeKind::BigInt(_)
        | NodeKind::Float(_)
        | NodeKind::Imaginary(_)
        | NodeKind::Str(_)
        | NodeKind::Bytes(_)
        | NodeKind::Bool(_) => {}
    }
}

/// Finds the function, class, lambda or comprehension node whose span is exactly `span`.
///
/// Only subtrees whose span contains `span` are entered, so the search follows a single path down
/// from `root`. Used to pick a single definition out of a loaded module.
///
/// ```
/// use pysst::{NodeKind, Span, visit::find_scope_node};
///
/// let code = "def outer():\n    def inner(): pass\n";
/// let module = pysst::build(code).unwrap();
/// let start = code.find("def inner").unwrap() as u32;
/// let found = find_scope_node(&module.body, Span::new(start, start + 17)).unwrap();
/// assert!(matches!(&found.kind, NodeKind::FunctionDef(f) if f.name == "inner"));
/// ```
#[must_use]
pub fn find_scope_node(root: &Node, span: Span) -> Option<&Node> {
    if span.is_none() {
        return None;
    }
    let mut finder = ScopeNodeFinder { span, found: None };
    finder.visit_node(root);
    finder.found
}

struct ScopeNodeFinder<'a> {
    span: Span,
    found: Option<&'a Node>,
}

impl<'a> Visitor<'a> for ScopeNodeFinder<'a> {
    fn visit_node(&mut self, node: &'a Node) {
        // synthesized nodes have no span but may hold real ones
        if self.found.is_some() || (!node.span.is_none() && !node.span.contains(self.span)) {
            return;
        }
        if node.span == self.span
            && matches!(
                node.kind,
                NodeKind::FunctionDef(_) | NodeKind::ClassDef(_) | NodeKind::Lambda(_) | NodeKind::Comprehension(_)
            )
        {
            self.found = Some(node);
            return;
        }
        walk_node(self, node);
    }
}
