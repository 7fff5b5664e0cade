use std::collections::HashSet;

use serde::Deserialize;
use swc_core::{
    common::DUMMY_SP,
    ecma::{
        ast::*,
        visit::{Visit, VisitMut, VisitMutWith, VisitWith},
    },
    plugin::{
        metadata::TransformPluginMetadataContextKind, plugin_transform,
        proxies::TransformPluginProgramMetadata,
    },
};

// -----------------------------------------------------------------------------
// Options
// -----------------------------------------------------------------------------

/// Plugin configuration, deserialized from the host's JSON options block.
/// Unknown or malformed config degrades to the defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TagOptions {
    /// Substring marking the project root; the injected path starts at its
    /// first occurrence (`/home/me/app/src/Foo.jsx` -> `src/Foo.jsx`).
    pub root_marker: String,
    /// Name of the injected attribute.
    pub attribute_name: String,
    /// When false the plugin entry returns the program untouched.
    pub enabled: bool,
}

impl Default for TagOptions {
    fn default() -> Self {
        Self {
            root_marker: "src/".to_string(),
            attribute_name: "__file-path".to_string(),
            enabled: true,
        }
    }
}

// -----------------------------------------------------------------------------
// Filename helpers
// -----------------------------------------------------------------------------

/// Project-relative display path for one source file.
///
/// Backslashes are normalized to forward slashes, then everything before the
/// first occurrence of `marker` is trimmed; a path without the marker is used
/// unchanged. A missing filename degrades to `"unknown"` instead of failing
/// the build.
fn display_path(filename: Option<&str>, marker: &str) -> String {
    let Some(raw) = filename.filter(|f| !f.is_empty()) else {
        tracing::warn!("no source filename available, tagging with placeholder path");
        return "unknown".to_string();
    };
    let normalized = raw.replace('\\', "/");
    match normalized.find(marker) {
        Some(idx) => normalized[idx..].to_string(),
        None => normalized,
    }
}

// -----------------------------------------------------------------------------
// Per-file state
// -----------------------------------------------------------------------------

/// Identity of an opening tag, keyed by address. Tree nodes carry no natural
/// hashable key, and structurally equal siblings must stay distinct.
type NodeId = usize;

fn opening_id(opening: &JSXOpeningElement) -> NodeId {
    opening as *const JSXOpeningElement as usize
}

/// State for one file: the display path plus the opening tags resolved as
/// topmost. The set only grows during collection; the injector consults it
/// read-only, after which the whole context is dropped.
struct FileContext {
    path: String,
    topmost: HashSet<NodeId>,
}

// -----------------------------------------------------------------------------
// Topmost resolution
// -----------------------------------------------------------------------------

fn peel_parens(mut expr: &Expr) -> &Expr {
    while let Expr::Paren(paren) = expr {
        expr = &paren.expr;
    }
    expr
}

/// Right-hand operand at the end of an `a && b && …` chain.
fn conjunction_tail(bin: &BinExpr) -> &Expr {
    let mut tail = peel_parens(&bin.right);
    while let Expr::Bin(inner) = tail {
        if inner.op != BinaryOp::LogicalAnd {
            break;
        }
        tail = peel_parens(&inner.right);
    }
    tail
}

fn mark_element(topmost: &mut HashSet<NodeId>, element: &JSXElement) {
    topmost.insert(opening_id(&element.opening));
}

/// Three-way classification shared by fragment children, attribute values and
/// returned expressions: a direct element, a `cond && <El/>` conjunction whose
/// last operand is an element, or a ternary whose branches are checked
/// independently (one, both, or neither may qualify). Anything else is skipped
/// silently.
fn mark_slot_expr(topmost: &mut HashSet<NodeId>, expr: &Expr) {
    match peel_parens(expr) {
        Expr::JSXElement(element) => mark_element(topmost, element),
        Expr::Bin(bin) if bin.op == BinaryOp::LogicalAnd => {
            if let Expr::JSXElement(element) = conjunction_tail(bin) {
                mark_element(topmost, element);
            }
        }
        Expr::Cond(cond) => {
            for branch in [&cond.cons, &cond.alt] {
                if let Expr::JSXElement(element) = peel_parens(branch) {
                    mark_element(topmost, element);
                }
            }
        }
        _ => {}
    }
}

/// Classify each top-level child of a fragment. Every qualifying child is
/// marked, not only the first.
fn mark_fragment_children(topmost: &mut HashSet<NodeId>, fragment: &JSXFragment) {
    for child in &fragment.children {
        match child {
            JSXElementChild::JSXElement(element) => mark_element(topmost, element),
            JSXElementChild::JSXExprContainer(container) => {
                if let JSXExpr::Expr(expr) = &container.expr {
                    mark_slot_expr(topmost, expr);
                }
            }
            _ => {}
        }
    }
}

/// Classify a returned expression. Fragments delegate to per-child tagging;
/// everything else goes through the shared slot classification.
fn mark_returned_expr(topmost: &mut HashSet<NodeId>, expr: &Expr) {
    match peel_parens(expr) {
        Expr::JSXFragment(fragment) => mark_fragment_children(topmost, fragment),
        other => mark_slot_expr(topmost, other),
    }
}

/// Collects return sites within one component subtree: explicit `return`
/// statements and arrow-function expression bodies. Every return site is
/// classified independently — an earlier match never suppresses a later one,
/// so a loading-state guard and the main-content return both get tagged.
struct ReturnSites<'a> {
    topmost: &'a mut HashSet<NodeId>,
}

impl Visit for ReturnSites<'_> {
    fn visit_return_stmt(&mut self, node: &ReturnStmt) {
        if let Some(arg) = &node.arg {
            mark_returned_expr(self.topmost, arg);
        }
        node.visit_children_with(self);
    }

    fn visit_arrow_expr(&mut self, node: &ArrowExpr) {
        if let BlockStmtOrExpr::Expr(expr) = &*node.body {
            mark_returned_expr(self.topmost, expr);
        }
        node.visit_children_with(self);
    }
}

/// Pass 1: walks component definitions and attribute values, accumulating the
/// topmost opening tags for the whole file into the shared context.
struct TopmostCollector<'a> {
    ctx: &'a mut FileContext,
}

impl TopmostCollector<'_> {
    fn scan_function(&mut self, function: &Function) {
        function.visit_with(&mut ReturnSites {
            topmost: &mut self.ctx.topmost,
        });
    }

    fn scan_initializer(&mut self, init: &Expr) {
        let init = peel_parens(init);
        if matches!(init, Expr::Arrow(_) | Expr::Fn(_)) {
            init.visit_with(&mut ReturnSites {
                topmost: &mut self.ctx.topmost,
            });
        }
    }
}

impl Visit for TopmostCollector<'_> {
    fn visit_fn_decl(&mut self, node: &FnDecl) {
        self.scan_function(&node.function);
        // Nested declarations are scanned on their own terms as well.
        node.visit_children_with(self);
    }

    fn visit_var_declarator(&mut self, node: &VarDeclarator) {
        if let Some(init) = &node.init {
            self.scan_initializer(init);
        }
        node.visit_children_with(self);
    }

    fn visit_export_default_decl(&mut self, node: &ExportDefaultDecl) {
        if let DefaultDecl::Fn(fn_expr) = &node.decl {
            self.scan_function(&fn_expr.function);
        }
        node.visit_children_with(self);
    }

    fn visit_export_default_expr(&mut self, node: &ExportDefaultExpr) {
        self.scan_initializer(&node.expr);
        node.visit_children_with(self);
    }

    // Elements passed through props (e.g. a routed screen) are tagged at
    // their definition site even though they are not a return value of the
    // enclosing component.
    fn visit_jsx_attr(&mut self, node: &JSXAttr) {
        if let Some(JSXAttrValue::JSXExprContainer(container)) = &node.value {
            if let JSXExpr::Expr(expr) = &container.expr {
                mark_slot_expr(&mut self.ctx.topmost, expr);
            }
        }
        node.visit_children_with(self);
    }
}

// -----------------------------------------------------------------------------
// Attribute injection
// -----------------------------------------------------------------------------

fn has_attribute(attrs: &[JSXAttrOrSpread], name: &str) -> bool {
    attrs.iter().any(|attr| {
        if let JSXAttrOrSpread::JSXAttr(jsx_attr) = attr {
            if let JSXAttrName::Ident(ident) = &jsx_attr.name {
                return ident.sym.as_ref() == name;
            }
        }
        false
    })
}

fn path_attribute(name: &str, path: &str) -> JSXAttrOrSpread {
    JSXAttrOrSpread::JSXAttr(JSXAttr {
        span: DUMMY_SP,
        name: JSXAttrName::Ident(IdentName::new(name.into(), DUMMY_SP)),
        value: Some(JSXAttrValue::Lit(Lit::Str(Str {
            span: DUMMY_SP,
            value: path.into(),
            raw: None,
        }))),
    })
}

/// Pass 2: appends the path attribute to every opening tag resolved as
/// topmost, unless a same-named attribute is already present. Re-running the
/// tagger over an already-tagged tree is therefore a no-op.
struct PathAttrInjector<'a> {
    ctx: &'a FileContext,
    attribute_name: &'a str,
}

impl VisitMut for PathAttrInjector<'_> {
    fn visit_mut_jsx_opening_element(&mut self, node: &mut JSXOpeningElement) {
        if self.ctx.topmost.contains(&opening_id(node))
            && !has_attribute(&node.attrs, self.attribute_name)
        {
            node.attrs
                .push(path_attribute(self.attribute_name, &self.ctx.path));
        }
        node.visit_mut_children_with(self);
    }
}

// -----------------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------------

/// Resolves the topmost markup nodes of every component in `program` and tags
/// their opening elements with `options.attribute_name` set to the display
/// path derived from `filename`.
///
/// Node identity is the address of the opening tag, which stays stable across
/// both passes: JSX nodes sit behind `Box` allocations and the collection pass
/// does not restructure the tree.
pub fn tag_program(program: &mut Program, filename: Option<&str>, options: &TagOptions) {
    let mut ctx = FileContext {
        path: display_path(filename, &options.root_marker),
        topmost: HashSet::new(),
    };
    program.visit_with(&mut TopmostCollector { ctx: &mut ctx });
    program.visit_mut_with(&mut PathAttrInjector {
        ctx: &ctx,
        attribute_name: &options.attribute_name,
    });
}

#[plugin_transform]
pub fn process_transform(
    mut program: Program,
    metadata: TransformPluginProgramMetadata,
) -> Program {
    let options: TagOptions = metadata
        .get_transform_plugin_config()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default();
    if !options.enabled {
        return program;
    }

    let filename = metadata.get_context(&TransformPluginMetadataContextKind::Filename);
    tag_program(&mut program, filename.as_deref(), &options);
    program
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
