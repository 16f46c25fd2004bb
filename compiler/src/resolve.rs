// resolve.rs — Name resolution and IR construction for parsed packages
//
// Walks the parsed AST, resolves channel and node references, checks
// declared types against the types operations produce, and builds the
// in-memory `Package`.
//
// Preconditions: `ast` is a well-formed AST from the parser.
// Postconditions: on success the package's procs contain every node of the
//   source in source order, each typed as declared.
// Failure modes: unknown names, duplicate definitions, malformed attributes
//   and type disagreements produce `Diagnostic` entries. Resolution
//   continues past errors in other channels and procs; within one proc it
//   stops at the first bad node to avoid cascading reports.
// Side effects: none.

use crate::ast::*;
use crate::diag::{codes, Diagnostic};
use crate::id::{ChannelId, NodeId, ProcId};
use crate::ir::{
    mask, BinOp, Channel, ChannelOps, FlowControl, IrError, NaryOp, NodeKind, Package, Proc,
    Type, Value, MAX_BITS,
};
use crate::strictness::Strictness;

// ── Public entry point ──────────────────────────────────────────────────────

/// Build a `Package` from a parsed AST.
pub fn resolve_package(ast: &PackageAst) -> Result<Package, Vec<Diagnostic>> {
    let mut ctx = ResolveCtx {
        package: Package::new(ast.name.name.clone()),
        diagnostics: Vec::new(),
    };

    // Channels first: procs may reference channels declared after them.
    for item in &ast.items {
        if let Item::Chan(c) = item {
            ctx.resolve_channel(c);
        }
    }
    for item in &ast.items {
        if let Item::Proc(p) = item {
            ctx.resolve_proc(p);
        }
    }

    if ctx.diagnostics.is_empty() {
        Ok(ctx.package)
    } else {
        Err(ctx.diagnostics)
    }
}

/// Convert a type expression, checking bit widths.
pub fn resolve_type(ty: &TypeExpr) -> Result<Type, Diagnostic> {
    match ty {
        TypeExpr::Bits(w, span) => {
            if *w == 0 || *w > MAX_BITS as u64 {
                Err(Diagnostic::error(
                    codes::E0104,
                    Some(*span),
                    format!("bit width {w} is outside 1..={MAX_BITS}"),
                ))
            } else {
                Ok(Type::Bits(*w as u32))
            }
        }
        TypeExpr::Token(_) => Ok(Type::Token),
        TypeExpr::Tuple(elems, _) => elems
            .iter()
            .map(resolve_type)
            .collect::<Result<Vec<_>, _>>()
            .map(Type::Tuple),
    }
}

/// Check an untyped constant against `ty`.
pub fn resolve_value(value: &ValueExpr, ty: &Type) -> Result<Value, Diagnostic> {
    match (value, ty) {
        (ValueExpr::Number(n, span), Type::Bits(w)) => {
            if *n > mask(*w) {
                Err(Diagnostic::error(
                    codes::E0104,
                    Some(*span),
                    format!("value {n} does not fit in bits[{w}]"),
                ))
            } else {
                Ok(Value::bits(*w, *n))
            }
        }
        (ValueExpr::Tuple(elems, span), Type::Tuple(tys)) => {
            if elems.len() != tys.len() {
                return Err(Diagnostic::error(
                    codes::E0104,
                    Some(*span),
                    format!("tuple value has {} elements but {ty} has {}", elems.len(), tys.len()),
                ));
            }
            elems
                .iter()
                .zip(tys)
                .map(|(v, t)| resolve_value(v, t))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Tuple)
        }
        (v, t) => Err(Diagnostic::error(
            codes::E0104,
            Some(v.span()),
            format!("constant is not a value of type {t}"),
        )),
    }
}

// ── Internal context ────────────────────────────────────────────────────────

struct ResolveCtx {
    package: Package,
    diagnostics: Vec<Diagnostic>,
}

impl ResolveCtx {
    fn error(&mut self, code: crate::diag::DiagCode, span: Span, message: String) {
        self.diagnostics
            .push(Diagnostic::error(code, Some(span), message));
    }

    // ── Channels ────────────────────────────────────────────────────────

    fn resolve_channel(&mut self, decl: &ChanDecl) {
        let ty = match resolve_type(&decl.ty) {
            Ok(ty) => ty,
            Err(d) => {
                self.diagnostics.push(d);
                return;
            }
        };
        if ty.contains_token() {
            self.error(
                codes::E0104,
                decl.ty.span(),
                format!("channel `{}` cannot carry tokens", decl.name.name),
            );
            return;
        }

        let mut id = None;
        let mut ops = ChannelOps::SendReceive;
        let mut flow_control = FlowControl::ReadyValid;
        let mut strictness = Strictness::default();
        let mut metadata = String::new();
        let mut seen: Vec<&str> = Vec::new();

        for attr in &decl.attrs {
            let key = attr.key.name.as_str();
            if seen.contains(&key) {
                self.error(
                    codes::E0102,
                    attr.span,
                    format!("duplicate attribute `{key}` on channel `{}`", decl.name.name),
                );
                continue;
            }
            seen.push(key);
            let outcome: Result<(), String> = match (key, &attr.value) {
                ("id", AttrValue::Value(ValueExpr::Number(n, _))) => match u32::try_from(*n) {
                    Ok(n) => {
                        id = Some(ChannelId(n));
                        Ok(())
                    }
                    Err(_) => Err(format!("channel id {n} is too large")),
                },
                ("kind", AttrValue::Ident(k)) if k.name == "streaming" => Ok(()),
                ("kind", _) => Err("only streaming channels are supported".to_string()),
                ("ops", AttrValue::Ident(v)) => v.name.parse().map(|v| ops = v),
                ("flow_control", AttrValue::Ident(v)) => v.name.parse().map(|v| flow_control = v),
                ("strictness", AttrValue::Ident(v)) => v.name.parse().map(|v| strictness = v),
                ("metadata", AttrValue::Str(s, _)) => {
                    metadata = s.clone();
                    Ok(())
                }
                ("id" | "ops" | "flow_control" | "strictness" | "metadata", _) => {
                    Err(format!("malformed value for `{key}`"))
                }
                _ => Err(format!("unknown channel attribute `{key}`")),
            };
            if let Err(message) = outcome {
                self.error(codes::E0104, attr.value.span(), message);
            }
        }

        let id = id.unwrap_or_else(|| self.package.next_channel_id());
        let channel = Channel {
            id,
            name: decl.name.name.clone(),
            ty,
            ops,
            flow_control,
            strictness,
            metadata,
            span: Some(decl.span),
        };
        if let Err(e) = self.package.add_channel(channel) {
            self.error(codes::E0102, decl.name.span, e.to_string());
        }
    }

    // ── Procs ───────────────────────────────────────────────────────────

    fn resolve_proc(&mut self, decl: &ProcDecl) {
        let Some(proc) = self.resolve_header(decl) else {
            return;
        };
        if decl.is_top {
            if let Some(existing) = &self.package.top {
                self.error(
                    codes::E0102,
                    decl.name.span,
                    format!("proc `{}` is marked top but `{existing}` already is", decl.name.name),
                );
            } else {
                self.package.top = Some(decl.name.name.clone());
            }
        }
        let pid = match self.package.add_proc(proc) {
            Ok(pid) => pid,
            Err(e) => {
                self.error(codes::E0102, decl.name.span, e.to_string());
                return;
            }
        };

        for stmt in &decl.body {
            if let Err(d) = self.resolve_node(pid, stmt) {
                self.diagnostics.push(d);
                return;
            }
        }
        self.resolve_next(pid, &decl.next);
    }

    /// Build the empty proc from its `(params..., init={...})` header.
    fn resolve_header(&mut self, decl: &ProcDecl) -> Option<Proc> {
        let mut params = Vec::new();
        let mut init: Option<(&Vec<ValueExpr>, Span)> = None;
        for item in &decl.header {
            match item {
                HeaderItem::Param { name, ty } => {
                    if init.is_some() {
                        self.error(codes::E0206, name.span, "parameters must precede `init`".into());
                        return None;
                    }
                    match resolve_type(ty) {
                        Ok(t) => params.push((name, t)),
                        Err(d) => {
                            self.diagnostics.push(d);
                            return None;
                        }
                    }
                }
                HeaderItem::Init { key, values, span } => {
                    if key.name != "init" || init.is_some() {
                        self.error(codes::E0206, key.span, format!("unexpected `{}` in proc header", key.name));
                        return None;
                    }
                    init = Some((values, *span));
                }
            }
        }

        let Some(((tok_name, tok_ty), state)) = params.split_first() else {
            self.error(codes::E0206, decl.name.span, format!("proc `{}` has no token parameter", decl.name.name));
            return None;
        };
        if *tok_ty != Type::Token {
            self.error(
                codes::E0206,
                tok_name.span,
                format!("first parameter of proc `{}` must be a token", decl.name.name),
            );
            return None;
        }

        let values: &[ValueExpr] = init.map(|(v, _)| v.as_slice()).unwrap_or(&[]);
        if values.len() != state.len() {
            let span = init.map(|(_, s)| s).unwrap_or(decl.name.span);
            self.error(
                codes::E0206,
                span,
                format!(
                    "proc `{}` has {} state parameters but {} initial values",
                    decl.name.name,
                    state.len(),
                    values.len()
                ),
            );
            return None;
        }

        let mut state_params = Vec::new();
        for ((name, ty), value) in state.iter().zip(values) {
            if ty.contains_token() {
                self.error(codes::E0206, name.span, format!("state `{}` cannot hold a token", name.name));
                return None;
            }
            match resolve_value(value, ty) {
                Ok(v) => state_params.push((name.name.clone(), ty.clone(), v)),
                Err(d) => {
                    self.diagnostics.push(d);
                    return None;
                }
            }
        }

        let mut proc = Proc::new(decl.name.name.clone(), tok_name.name.clone(), state_params);
        let mut names: Vec<&str> = Vec::new();
        for (name, _) in &params {
            if names.contains(&name.name.as_str()) {
                self.error(codes::E0102, name.span, format!("duplicate parameter `{}`", name.name));
                return None;
            }
            names.push(&name.name);
        }
        proc.span = Some(decl.span);
        Some(proc)
    }

    fn resolve_node(&mut self, pid: ProcId, stmt: &NodeStmt) -> Result<(), Diagnostic> {
        let declared = resolve_type(&stmt.ty)?;
        let kind = self.build_kind(pid, stmt, &declared)?;
        let op = kind.op_name();
        let id = self
            .package
            .add_node(pid, &stmt.name.name, kind, Some(stmt.span))
            .map_err(|e| ir_error(e, stmt.span))?;
        let inferred = &self.package.proc(pid).node(id).ty;
        if *inferred != declared {
            return Err(Diagnostic::error(
                codes::E0103,
                Some(stmt.ty.span()),
                format!(
                    "node `{}` is declared as {declared} but `{op}` produces {inferred}",
                    stmt.name.name
                ),
            ));
        }
        Ok(())
    }

    fn build_kind(&self, pid: ProcId, stmt: &NodeStmt, declared: &Type) -> Result<NodeKind, Diagnostic> {
        let proc = self.package.proc(pid);
        let mut args = Args::new(stmt);
        let operands = args
            .operands
            .iter()
            .map(|id| lookup_node(proc, id))
            .collect::<Result<Vec<_>, _>>()?;
        let op = stmt.op.name.as_str();

        let kind = match op {
            "literal" => {
                args.arity(0)?;
                let value = match args.keyword("value")? {
                    AttrValue::Value(v) => resolve_value(v, declared)?,
                    other => return Err(malformed("value", other)),
                };
                NodeKind::Literal(value)
            }
            "receive" => {
                args.arity(1)?;
                NodeKind::Receive {
                    token: operands[0],
                    predicate: args.optional_node(proc, "predicate")?,
                    channel: args.channel(&self.package, "channel")?,
                }
            }
            "send" => {
                args.arity(2)?;
                NodeKind::Send {
                    token: operands[0],
                    data: operands[1],
                    predicate: args.optional_node(proc, "predicate")?,
                    channel: args.channel(&self.package, "channel")?,
                }
            }
            "after_all" => NodeKind::AfterAll(operands),
            "tuple" => NodeKind::Tuple(operands),
            "tuple_index" => {
                args.arity(1)?;
                NodeKind::TupleIndex {
                    tuple: operands[0],
                    index: args.number("index")? as usize,
                }
            }
            "not" => {
                args.arity(1)?;
                NodeKind::Not(operands[0])
            }
            "bit_slice" => {
                args.arity(1)?;
                let start = args.number("start")?;
                let width = args.number("width")?;
                NodeKind::BitSlice {
                    operand: operands[0],
                    start: u32::try_from(start).unwrap_or(u32::MAX),
                    width: u32::try_from(width).unwrap_or(u32::MAX),
                }
            }
            "sel" => {
                args.arity(1)?;
                let cases = match args.keyword("cases")? {
                    AttrValue::List(ids, _) => ids
                        .iter()
                        .map(|id| lookup_node(proc, id))
                        .collect::<Result<Vec<_>, _>>()?,
                    other => return Err(malformed("cases", other)),
                };
                NodeKind::Sel {
                    selector: operands[0],
                    cases,
                    default: args.optional_node(proc, "default")?,
                }
            }
            "assert" => {
                args.arity(2)?;
                NodeKind::Assert {
                    token: operands[0],
                    condition: operands[1],
                    message: args.string("message")?.unwrap_or_default(),
                    label: args.string("label")?.unwrap_or_default(),
                }
            }
            other => {
                if let Some(op) = NaryOp::from_name(other) {
                    NodeKind::Nary { op, operands }
                } else if let Some(op) = BinOp::from_name(other) {
                    args.arity(2)?;
                    NodeKind::Binary {
                        op,
                        lhs: operands[0],
                        rhs: operands[1],
                    }
                } else {
                    return Err(Diagnostic::error(
                        codes::E0105,
                        Some(stmt.op.span),
                        format!("unknown operation `{other}`"),
                    ));
                }
            }
        };
        args.finish()?;
        Ok(kind)
    }

    fn resolve_next(&mut self, pid: ProcId, next: &NextStmt) {
        let proc = self.package.proc(pid);
        let resolved: Result<Vec<NodeId>, Diagnostic> =
            next.operands.iter().map(|id| lookup_node(proc, id)).collect();
        let operands = match resolved {
            Ok(ops) => ops,
            Err(d) => {
                self.diagnostics.push(d);
                return;
            }
        };
        let expected = proc.params.len();
        if operands.len() != expected {
            let name = proc.name.clone();
            self.error(
                codes::E0206,
                next.span,
                format!("next of proc `{name}` takes {expected} operands, found {}", operands.len()),
            );
            return;
        }
        let proc = self.package.proc_mut(pid);
        proc.next_token = operands[0];
        proc.next_state = operands[1..].to_vec();
    }
}

// ── Operation arguments ─────────────────────────────────────────────────────

/// Positional operands and keyword arguments of one node statement; tracks
/// which keywords were consumed so leftovers can be reported.
struct Args<'a> {
    stmt: &'a NodeStmt,
    operands: Vec<&'a Ident>,
    keywords: Vec<(&'a Attr, bool)>,
}

impl<'a> Args<'a> {
    fn new(stmt: &'a NodeStmt) -> Self {
        let mut operands = Vec::new();
        let mut keywords = Vec::new();
        for arg in &stmt.args {
            match arg {
                Arg::Operand(id) => operands.push(id),
                Arg::Keyword(attr) => keywords.push((attr, false)),
            }
        }
        Args {
            stmt,
            operands,
            keywords,
        }
    }

    fn arity(&self, n: usize) -> Result<(), Diagnostic> {
        if self.operands.len() == n {
            Ok(())
        } else {
            Err(Diagnostic::error(
                codes::E0104,
                Some(self.stmt.op.span),
                format!(
                    "`{}` takes {n} operands, found {}",
                    self.stmt.op.name,
                    self.operands.len()
                ),
            ))
        }
    }

    fn take(&mut self, key: &str) -> Result<Option<&'a AttrValue>, Diagnostic> {
        let mut found = None;
        for (attr, used) in &mut self.keywords {
            let attr: &'a Attr = *attr;
            if attr.key.name == key {
                if found.is_some() {
                    return Err(Diagnostic::error(
                        codes::E0102,
                        Some(attr.span),
                        format!("duplicate keyword `{key}`"),
                    ));
                }
                *used = true;
                found = Some(&attr.value);
            }
        }
        Ok(found)
    }

    fn keyword(&mut self, key: &str) -> Result<&'a AttrValue, Diagnostic> {
        let stmt = self.stmt;
        self.take(key)?.ok_or_else(|| {
            Diagnostic::error(
                codes::E0104,
                Some(stmt.op.span),
                format!("`{}` requires `{key}=`", stmt.op.name),
            )
        })
    }

    fn number(&mut self, key: &str) -> Result<u64, Diagnostic> {
        match self.keyword(key)? {
            AttrValue::Value(ValueExpr::Number(n, _)) => Ok(*n),
            other => Err(malformed(key, other)),
        }
    }

    fn string(&mut self, key: &str) -> Result<Option<String>, Diagnostic> {
        match self.take(key)? {
            None => Ok(None),
            Some(AttrValue::Str(s, _)) => Ok(Some(s.clone())),
            Some(other) => Err(malformed(key, other)),
        }
    }

    fn optional_node(&mut self, proc: &Proc, key: &str) -> Result<Option<NodeId>, Diagnostic> {
        match self.take(key)? {
            None => Ok(None),
            Some(AttrValue::Ident(id)) => lookup_node(proc, id).map(Some),
            Some(other) => Err(malformed(key, other)),
        }
    }

    fn channel(&mut self, package: &Package, key: &str) -> Result<ChannelId, Diagnostic> {
        match self.keyword(key)? {
            AttrValue::Ident(id) => package
                .channel_by_name(&id.name)
                .map(|c| c.id)
                .ok_or_else(|| {
                    Diagnostic::error(
                        codes::E0101,
                        Some(id.span),
                        format!("unknown channel `{}`", id.name),
                    )
                }),
            other => Err(malformed(key, other)),
        }
    }

    fn finish(self) -> Result<(), Diagnostic> {
        match self.keywords.iter().find(|(_, used)| !used) {
            Some((attr, _)) => Err(Diagnostic::error(
                codes::E0104,
                Some(attr.key.span),
                format!("unexpected keyword `{}` for `{}`", attr.key.name, self.stmt.op.name),
            )),
            None => Ok(()),
        }
    }
}

fn lookup_node(proc: &Proc, id: &Ident) -> Result<NodeId, Diagnostic> {
    proc.node_by_name(&id.name).ok_or_else(|| {
        Diagnostic::error(
            codes::E0101,
            Some(id.span),
            format!("unknown node `{}` in proc `{}`", id.name, proc.name),
        )
    })
}

fn malformed(key: &str, value: &AttrValue) -> Diagnostic {
    Diagnostic::error(
        codes::E0104,
        Some(value.span()),
        format!("malformed value for `{key}`"),
    )
}

fn ir_error(e: IrError, span: Span) -> Diagnostic {
    let code = match e {
        IrError::DuplicateNode { .. } => codes::E0102,
        IrError::UnknownChannel(_) | IrError::DeadOperand { .. } => codes::E0101,
        _ => codes::E0103,
    };
    Diagnostic::error(code, Some(span), e.to_string())
}
