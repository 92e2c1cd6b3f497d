// ABOUTME: The evaluator: statically interprets a parse tree, following includes,
// maintaining the scope stack, and accumulating the semantic model

use crate::ast::{
    AssignOp, BinaryOp, DirectiveCondition, Expression, ExpressionKind, ForEachIterator,
    GenericFunctionNode, Sigil, Statement, StatementKind, StringPart, StringTemplate,
    UserFunctionNode, VariableName, VariableNode,
};
use crate::config;
use crate::error::{DiagnosticKind, Severity};
use crate::model::{
    Diagnostic, EvaluatedData, GenericFunctionInvocation, IncludeEdge, TargetDefinition,
    TargetReference, VariableDefinition, VariableReference,
};
use crate::range::{Position, Range, UriRange};
use crate::schema::{self, FunctionSchema, TargetNameRule};
use crate::scope::ScopeStack;
use crate::source::{ParseCache, SourceDocument, SourceProvider};
use crate::value::{StructField, StructValue, Value, ValueKind};
use log::debug;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use url::Url;

/// Maximum user-function call depth before recursion is cut off.
const MAX_CALL_DEPTH: u32 = 64;

/// Cooperative cancellation flag, polled between statements and before
/// include execution.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Default)]
pub struct EvalOptions {
    /// Stop before the first statement at or past this position, returning
    /// what has accumulated so far plus a scope snapshot.
    pub stop_at: Option<(Url, Position)>,
    pub cancel: Option<CancelToken>,
    /// Extra `#if` symbols defined before evaluation starts, on top of the
    /// host platform symbol.
    pub extra_symbols: HashSet<String>,
}

impl EvalOptions {
    pub fn stop_at(uri: Url, position: Position) -> Self {
        Self {
            stop_at: Some((uri, position)),
            ..Self::default()
        }
    }
}

/// Evaluate `root` and everything it includes. Never fails: problems become
/// diagnostics inside the returned data.
pub fn evaluate(
    root: &Url,
    provider: &dyn SourceProvider,
    cache: &ParseCache,
    options: EvalOptions,
) -> EvaluatedData {
    let mut evaluator = Evaluator::new(root.clone(), provider, cache, options);
    evaluator.run();
    evaluator.data
}

/// Why evaluation unwound early. The interesting state (snapshot, canceled
/// diagnostic) is recorded at the point of interruption, so unwinding is
/// free to pop frames on the way out.
enum Interrupt {
    Stopped,
    Canceled,
}

type Flow<T> = Result<T, Interrupt>;

#[derive(Debug, Clone)]
struct UserFunction {
    decl_uri: Url,
    decl_range: Range,
    params: Vec<crate::ast::FunctionParam>,
    body: Vec<Statement>,
}

struct Evaluator<'a> {
    provider: &'a dyn SourceProvider,
    cache: &'a ParseCache,
    options: EvalOptions,
    root: Url,
    data: EvaluatedData,
    scopes: ScopeStack,
    symbols: HashSet<String>,
    functions: HashMap<String, UserFunction>,
    /// Files currently on the include path, for cycle detection.
    include_path: Vec<Url>,
    /// Files whose `#once` has executed; they are never entered again.
    once_seen: HashSet<Url>,
    /// Files whose parse diagnostics have been copied into the output.
    reported_files: HashSet<Url>,
    /// Schema of the enclosing generic-function body, one entry per nesting
    /// level of executed bodies (`None` for unknown functions).
    generic_context: Vec<Option<&'static FunctionSchema>>,
    /// Non-zero while the right-hand side of a target-reference property is
    /// being evaluated; string literals then emit target references.
    target_ref_depth: u32,
    call_depth: u32,
}

impl<'a> Evaluator<'a> {
    fn new(
        root: Url,
        provider: &'a dyn SourceProvider,
        cache: &'a ParseCache,
        options: EvalOptions,
    ) -> Self {
        let mut symbols = config::host_symbols();
        symbols.extend(options.extra_symbols.iter().cloned());
        Self {
            provider,
            cache,
            options,
            root,
            data: EvaluatedData::new(),
            scopes: ScopeStack::new(),
            symbols,
            functions: HashMap::new(),
            include_path: Vec::new(),
            once_seen: HashSet::new(),
            reported_files: HashSet::new(),
            generic_context: Vec::new(),
            target_ref_depth: 0,
            call_depth: 0,
        }
    }

    fn run(&mut self) {
        debug!("evaluating {}", self.root);
        let root = self.root.clone();
        match self.provider.document(&root) {
            Ok(document) => match self.execute_document(&root, &document) {
                Ok(()) => {
                    // A cursor past the last statement never fires the
                    // stop check; the end-of-run scope is what it sees.
                    if self.options.stop_at.is_some() && self.data.scope_snapshot.is_none() {
                        self.data.scope_snapshot = Some(self.scopes.snapshot());
                    }
                }
                Err(Interrupt::Stopped) => debug!("evaluation stopped at cursor"),
                Err(Interrupt::Canceled) => debug!("evaluation canceled"),
            },
            Err(err) => {
                self.diagnostic(
                    UriRange::new(root, Range::on_line(0, 0, 0)),
                    Severity::Error,
                    DiagnosticKind::Io,
                    err.to_string(),
                );
            }
        }
        self.data.finalize();
    }

    // ========================================================================
    // Interruption
    // ========================================================================

    fn check_flow(&mut self, uri: &Url, range: Range) -> Flow<()> {
        if let Some(token) = &self.options.cancel {
            if token.is_canceled() {
                self.diagnostic(
                    UriRange::new(uri.clone(), range),
                    Severity::Warning,
                    DiagnosticKind::Canceled,
                    "evaluation canceled",
                );
                return Err(Interrupt::Canceled);
            }
        }
        if let Some((stop_uri, stop_position)) = &self.options.stop_at {
            if stop_uri == uri && range.start >= *stop_position {
                self.data.scope_snapshot = Some(self.scopes.snapshot());
                return Err(Interrupt::Stopped);
            }
        }
        Ok(())
    }

    /// Fires the stop check at the end of a brace body, so a cursor sitting
    /// after the body's last statement still stops while the body's frame
    /// is on the stack.
    fn check_body_end(&mut self, uri: &Url, end: Position) -> Flow<()> {
        self.check_flow(uri, Range::new(end, end))
    }

    // ========================================================================
    // Files and statements
    // ========================================================================

    fn execute_document(&mut self, uri: &Url, document: &SourceDocument) -> Flow<()> {
        let parsed = self.cache.parse(uri, document);
        if self.reported_files.insert(uri.clone()) {
            for file_diagnostic in &parsed.diagnostics {
                self.data.diagnostics.push(file_diagnostic.in_file(uri));
            }
        }
        self.include_path.push(uri.clone());
        let result = self.execute_statements(uri, &parsed.statements);
        self.include_path.pop();
        result
    }

    fn execute_statements(&mut self, uri: &Url, statements: &[Statement]) -> Flow<()> {
        for statement in statements {
            self.check_flow(uri, statement.range)?;
            self.execute_statement(uri, statement)?;
        }
        Ok(())
    }

    fn execute_statement(&mut self, uri: &Url, statement: &Statement) -> Flow<()> {
        match &statement.kind {
            StatementKind::Assign { lhs, op, rhs } => {
                self.execute_assignment(uri, statement.range, lhs, *op, rhs)
            }
            StatementKind::Using { expr } => self.execute_using(uri, statement.range, expr),
            StatementKind::ForEach { iterators, body } => {
                self.execute_for_each(uri, statement.range, iterators, body)
            }
            StatementKind::If {
                condition,
                then_body,
                else_body,
            } => {
                let value = self.evaluate_expression(uri, condition)?;
                let take_then = self.expect_boolean(uri, condition.range, value) == Some(true);
                let branch = if take_then {
                    Some(then_body)
                } else {
                    else_body.as_ref()
                };
                if let Some(branch) = branch {
                    self.scopes.push();
                    let result = self
                        .execute_statements(uri, branch)
                        .and_then(|()| self.check_body_end(uri, statement.range.end));
                    self.scopes.pop();
                    result?;
                }
                Ok(())
            }
            StatementKind::Print { expr } => {
                let value = self.evaluate_expression(uri, expr)?;
                debug!("Print at {}: {}", statement.range, value);
                Ok(())
            }
            StatementKind::Block(body) => {
                self.scopes.push();
                let result = self
                    .execute_statements(uri, body)
                    .and_then(|()| self.check_body_end(uri, statement.range.end));
                self.scopes.pop();
                result
            }
            StatementKind::GenericFunction(node) => self.execute_generic_function(uri, node),
            StatementKind::Include { path } => self.execute_include(uri, path),
            StatementKind::Once => {
                self.once_seen.insert(uri.clone());
                Ok(())
            }
            StatementKind::Define { name, name_range } => {
                if !self.symbols.insert(name.clone()) {
                    self.diagnostic(
                        UriRange::new(uri.clone(), *name_range),
                        Severity::Warning,
                        DiagnosticKind::Structural,
                        format!("'{}' is already defined", name),
                    );
                }
                Ok(())
            }
            StatementKind::Undef { name, name_range } => {
                if !self.symbols.remove(name) {
                    self.diagnostic(
                        UriRange::new(uri.clone(), *name_range),
                        Severity::Warning,
                        DiagnosticKind::Structural,
                        format!("'{}' is not defined", name),
                    );
                }
                Ok(())
            }
            StatementKind::DirectiveIf {
                condition,
                then_body,
                else_body,
            } => {
                // Preprocessor conditioning: the chosen branch runs in the
                // current frame.
                let branch = if self.directive_condition(condition) {
                    then_body
                } else {
                    else_body
                };
                self.execute_statements(uri, branch)
            }
            StatementKind::FunctionDecl(node) => {
                self.register_function(uri, statement.range, node);
                self.probe_declared_body(uri, statement.range, node)
            }
            StatementKind::FunctionCall {
                name,
                name_range,
                args,
            } => self.execute_function_call(uri, name, *name_range, args),
        }
    }

    // ========================================================================
    // Assignment
    // ========================================================================

    fn execute_assignment(
        &mut self,
        uri: &Url,
        statement_range: Range,
        lhs: &VariableNode,
        op: AssignOp,
        rhs: &Expression,
    ) -> Flow<()> {
        let name = match self.resolve_variable_name(uri, lhs)? {
            Some(name) => name,
            None => return Ok(()),
        };
        let lhs_range = UriRange::new(uri.clone(), lhs.range);

        // A read-modify assignment reads before it writes.
        let (target_frame, old_value) = match op {
            AssignOp::Set => (None, None),
            AssignOp::Concat | AssignOp::Subtract => {
                let found = match lhs.sigil {
                    Sigil::Dot => self.scopes.frame_defining(&name),
                    Sigil::Caret => self.scopes.frame_defining_from_parent(&name),
                };
                match found {
                    Some(frame_index) => {
                        let binding = self
                            .scopes
                            .binding_in_frame(frame_index, &name)
                            .expect("frame_defining returned this frame");
                        let old = binding.value.clone();
                        let definitions = binding.definitions.clone();
                        self.emit_reference(uri, lhs.range, definitions);
                        (Some(frame_index), Some(old))
                    }
                    None => {
                        self.diagnostic(
                            lhs_range.clone(),
                            Severity::Error,
                            DiagnosticKind::Name,
                            format!("'{}' is modified before it is defined", name),
                        );
                        (None, None)
                    }
                }
            }
        };

        let in_target_property = self.assigning_target_property(lhs);
        if in_target_property {
            self.target_ref_depth += 1;
        }
        let rhs_value = self.evaluate_expression(uri, rhs);
        if in_target_property {
            self.target_ref_depth -= 1;
        }
        let rhs_value = rhs_value?;

        let new_value = match (op, old_value) {
            (AssignOp::Set, _) | (_, None) => rhs_value,
            (AssignOp::Concat, Some(old)) => {
                let mut notes = Vec::new();
                let result = old.add(rhs_value, &mut notes);
                for note in notes {
                    self.diagnostic(
                        UriRange::new(uri.clone(), statement_range),
                        Severity::Warning,
                        DiagnosticKind::Kind,
                        note,
                    );
                }
                match result {
                    Ok(value) => value,
                    Err(err) => {
                        self.diagnostic(
                            UriRange::new(uri.clone(), statement_range),
                            Severity::Error,
                            DiagnosticKind::Kind,
                            err.to_string(),
                        );
                        Value::Unknown
                    }
                }
            }
            (AssignOp::Subtract, Some(old)) => match old.subtract(rhs_value) {
                Ok(value) => value,
                Err(err) => {
                    self.diagnostic(
                        UriRange::new(uri.clone(), statement_range),
                        Severity::Error,
                        DiagnosticKind::Kind,
                        err.to_string(),
                    );
                    Value::Unknown
                }
            },
        };

        let frame_index = match (op, lhs.sigil, target_frame) {
            (_, _, Some(frame_index)) => frame_index,
            (AssignOp::Set, Sigil::Caret, None) => match self.scopes.parent_frame() {
                Some(parent) => parent,
                None => {
                    self.diagnostic(
                        lhs_range.clone(),
                        Severity::Error,
                        DiagnosticKind::Name,
                        format!("'^{}' has no parent scope to assign into", name),
                    );
                    self.scopes.current_frame_index()
                }
            },
            _ => self.scopes.current_frame_index(),
        };
        self.scopes
            .assign_in_frame(frame_index, &name, new_value.clone(), lhs_range.clone());

        self.data.variable_definitions.push(VariableDefinition {
            name,
            range: UriRange::new(uri.clone(), statement_range),
            lhs_range,
            value: new_value,
        });
        Ok(())
    }

    /// Whether this left-hand side assigns a target-reference property of
    /// the enclosing generic function.
    fn assigning_target_property(&self, lhs: &VariableNode) -> bool {
        let Some(Some(function)) = self.generic_context.last() else {
            return false;
        };
        let VariableName::Static(name) = &lhs.name else {
            return false;
        };
        function
            .property(name)
            .is_some_and(|property| property.target_reference)
    }

    // ========================================================================
    // Using / ForEach
    // ========================================================================

    fn execute_using(&mut self, uri: &Url, statement_range: Range, expr: &Expression) -> Flow<()> {
        let value = self.evaluate_expression(uri, expr)?;
        let using_range = UriRange::new(uri.clone(), statement_range);
        let fields = match value {
            Value::Struct(s) => s.fields,
            Value::Unknown => return Ok(()),
            other => {
                self.diagnostic(
                    UriRange::new(uri.clone(), expr.range),
                    Severity::Error,
                    DiagnosticKind::Kind,
                    format!("Using expects a Struct, got {}", other.kind()),
                );
                return Ok(());
            }
        };
        for (name, field) in fields {
            let mut sites = vec![using_range.clone()];
            sites.extend(field.definitions.iter().cloned());
            self.scopes
                .import_into_current(&name, field.value.clone(), sites);
            self.data.variable_definitions.push(VariableDefinition {
                name,
                range: using_range.clone(),
                lhs_range: using_range.clone(),
                value: field.value,
            });
        }
        Ok(())
    }

    fn execute_for_each(
        &mut self,
        uri: &Url,
        statement_range: Range,
        iterators: &[ForEachIterator],
        body: &[Statement],
    ) -> Flow<()> {
        struct LoopBinding {
            name: String,
            lhs_range: Range,
            elements: Vec<Value>,
        }

        let mut bindings = Vec::new();
        let mut lengths_range = statement_range;
        for iterator in iterators {
            let name = match self.resolve_variable_name(uri, &iterator.variable)? {
                Some(name) => name,
                None => return Ok(()),
            };
            let value = self.evaluate_expression(uri, &iterator.array)?;
            lengths_range = iterator.array.range;
            let elements = match value {
                Value::ArrayOfStrings(items) => items.into_iter().map(Value::String).collect(),
                Value::ArrayOfStructs(items) => items.into_iter().map(Value::Struct).collect(),
                Value::Unknown => return Ok(()),
                other => {
                    self.diagnostic(
                        UriRange::new(uri.clone(), iterator.array.range),
                        Severity::Error,
                        DiagnosticKind::Kind,
                        format!("ForEach expects an array, got {}", other.kind()),
                    );
                    return Ok(());
                }
            };
            bindings.push(LoopBinding {
                name,
                lhs_range: iterator.variable.range,
                elements,
            });
        }
        if bindings.is_empty() {
            return Ok(());
        }

        let min_len = bindings.iter().map(|b| b.elements.len()).min().unwrap_or(0);
        let max_len = bindings.iter().map(|b| b.elements.len()).max().unwrap_or(0);
        if min_len != max_len {
            self.diagnostic(
                UriRange::new(uri.clone(), lengths_range),
                Severity::Error,
                DiagnosticKind::Structural,
                format!(
                    "ForEach arrays have mismatched lengths ({} vs {})",
                    min_len, max_len
                ),
            );
        }

        for index in 0..min_len {
            self.scopes.push();
            for binding in &bindings {
                let element = binding.elements[index].clone();
                let lhs_range = UriRange::new(uri.clone(), binding.lhs_range);
                self.scopes
                    .assign_current(&binding.name, element.clone(), lhs_range.clone());
                self.data.variable_definitions.push(VariableDefinition {
                    name: binding.name.clone(),
                    range: lhs_range.clone(),
                    lhs_range,
                    value: element,
                });
            }
            let result = self
                .execute_statements(uri, body)
                .and_then(|()| self.check_body_end(uri, statement_range.end));
            self.scopes.pop();
            result?;
        }
        Ok(())
    }

    // ========================================================================
    // Generic functions
    // ========================================================================

    fn execute_generic_function(&mut self, uri: &Url, node: &GenericFunctionNode) -> Flow<()> {
        // Invocations cannot nest; this also keeps per-file invocation
        // containment unambiguous for the bisecting lookup.
        if !self.generic_context.is_empty() {
            self.diagnostic(
                UriRange::new(uri.clone(), node.header_range),
                Severity::Error,
                DiagnosticKind::Structural,
                format!("'{}' cannot be nested inside another function", node.name),
            );
            return Ok(());
        }
        let function = schema::lookup(&node.name);
        if function.is_none() {
            self.diagnostic(
                UriRange::new(uri.clone(), node.name_range),
                Severity::Error,
                DiagnosticKind::Name,
                format!("unknown function '{}'", node.name),
            );
        }

        let target_name = self.evaluate_target_name(uri, node, function)?;

        if function.is_some() {
            let invocation = GenericFunctionInvocation {
                function_name: node.name.clone(),
                header_range: UriRange::new(uri.clone(), node.header_range),
                body_range: UriRange::new(uri.clone(), node.body_range),
                target_name: target_name.clone(),
            };
            let per_file = self.data.generic_functions.entry(uri.clone()).or_default();
            if !per_file
                .iter()
                .any(|existing| existing.body_range == invocation.body_range)
            {
                per_file.push(invocation);
            }
        }

        if let (true, Some(name), Some(target_expr)) =
            (function.is_some(), &target_name, &node.target)
        {
            let name_range = UriRange::new(uri.clone(), target_expr.range);
            if self.data.target_definitions.contains_key(name) {
                self.diagnostic(
                    name_range.clone(),
                    Severity::Error,
                    DiagnosticKind::Structural,
                    format!("duplicate target '{}'", name),
                );
                self.data
                    .duplicate_target_definitions
                    .push(TargetDefinition {
                        name: name.clone(),
                        name_range,
                    });
            } else {
                self.data.target_definitions.insert(
                    name.clone(),
                    TargetDefinition {
                        name: name.clone(),
                        name_range,
                    },
                );
            }
        }

        self.generic_context.push(function);
        self.scopes.push();
        let result = self
            .execute_statements(uri, &node.body)
            .and_then(|()| self.check_body_end(uri, node.body_range.end));
        let frame = self.scopes.pop();
        self.generic_context.pop();
        result?;

        if let Some(function) = function {
            for (property_name, binding) in &frame.bindings {
                let site = binding
                    .definitions
                    .first()
                    .cloned()
                    .unwrap_or_else(|| UriRange::new(uri.clone(), node.header_range));
                match function.property(property_name) {
                    None => {
                        self.diagnostic(
                            site,
                            Severity::Error,
                            DiagnosticKind::Kind,
                            format!(
                                "unknown property '{}' for '{}'",
                                property_name, function.name
                            ),
                        );
                    }
                    Some(property) => {
                        let kind = binding.value.kind();
                        if !property.permits(kind) {
                            let permitted: Vec<_> = property
                                .permitted_kinds
                                .iter()
                                .map(ValueKind::to_string)
                                .collect();
                            self.diagnostic(
                                site,
                                Severity::Error,
                                DiagnosticKind::Kind,
                                format!(
                                    "property '{}' must be {}, got {}",
                                    property_name,
                                    permitted.join(" or "),
                                    kind
                                ),
                            );
                        }
                    }
                }
            }
            for property in function.properties {
                if property.required && !frame.bindings.contains_key(property.name) {
                    self.diagnostic(
                        UriRange::new(uri.clone(), node.header_range),
                        Severity::Error,
                        DiagnosticKind::Kind,
                        format!(
                            "'{}' is missing required property '{}'",
                            function.name, property.name
                        ),
                    );
                }
            }
        }
        Ok(())
    }

    fn evaluate_target_name(
        &mut self,
        uri: &Url,
        node: &GenericFunctionNode,
        function: Option<&'static FunctionSchema>,
    ) -> Flow<Option<String>> {
        let rule = function.map(|f| f.target_name);
        match (&node.target, rule) {
            (Some(expr), Some(TargetNameRule::Forbidden)) => {
                self.diagnostic(
                    UriRange::new(uri.clone(), expr.range),
                    Severity::Error,
                    DiagnosticKind::Kind,
                    format!("'{}' does not take a target name", node.name),
                );
                Ok(None)
            }
            (Some(expr), _) => {
                let value = self.evaluate_expression(uri, expr)?;
                match value {
                    Value::String(name) => Ok(Some(name)),
                    Value::Unknown => Ok(None),
                    other => {
                        self.diagnostic(
                            UriRange::new(uri.clone(), expr.range),
                            Severity::Error,
                            DiagnosticKind::Kind,
                            format!("target name must be a String, got {}", other.kind()),
                        );
                        Ok(None)
                    }
                }
            }
            (None, Some(TargetNameRule::Required)) => {
                self.diagnostic(
                    UriRange::new(uri.clone(), node.header_range),
                    Severity::Error,
                    DiagnosticKind::Kind,
                    format!("'{}' requires a target name", node.name),
                );
                Ok(None)
            }
            (None, _) => Ok(None),
        }
    }

    // ========================================================================
    // Includes and directives
    // ========================================================================

    fn execute_include(&mut self, uri: &Url, path: &StringTemplate) -> Flow<()> {
        let value = self.evaluate_string_template(uri, path)?;
        let raw_path = match value {
            Value::String(path) => path,
            _ => return Ok(()),
        };
        let include_range = UriRange::new(uri.clone(), path.range);
        let relative = raw_path.replace('\\', "/");

        let mut candidates = Vec::new();
        if let Ok(resolved) = uri.join(&relative) {
            candidates.push(resolved);
        }
        if let Ok(resolved) = self.root.join(&relative) {
            if !candidates.contains(&resolved) {
                candidates.push(resolved);
            }
        }

        let mut found = None;
        for candidate in candidates {
            match self.provider.document(&candidate) {
                Ok(document) => {
                    found = Some((candidate, document));
                    break;
                }
                Err(err) => debug!("include candidate {} rejected: {}", candidate, err),
            }
        }
        let Some((target, document)) = found else {
            self.diagnostic(
                include_range,
                Severity::Error,
                DiagnosticKind::Io,
                format!("cannot resolve include '{}'", raw_path),
            );
            return Ok(());
        };

        self.data.include_edges.push(IncludeEdge {
            from_file: uri.clone(),
            include_string_range: include_range.clone(),
            to_file: target.clone(),
        });

        if self.include_path.contains(&target) {
            self.diagnostic(
                include_range,
                Severity::Warning,
                DiagnosticKind::Structural,
                format!("include cycle: '{}' is already being evaluated", raw_path),
            );
            return Ok(());
        }
        if self.once_seen.contains(&target) {
            debug!("skipping re-inclusion of #once file {}", target);
            return Ok(());
        }

        self.check_flow(uri, path.range)?;
        self.execute_document(&target, &document)
    }

    fn directive_condition(&self, condition: &DirectiveCondition) -> bool {
        match condition {
            DirectiveCondition::Defined { name, .. } => self.symbols.contains(name),
            DirectiveCondition::Not(inner) => !self.directive_condition(inner),
            DirectiveCondition::And(lhs, rhs) => {
                self.directive_condition(lhs) && self.directive_condition(rhs)
            }
            DirectiveCondition::Or(lhs, rhs) => {
                self.directive_condition(lhs) || self.directive_condition(rhs)
            }
        }
    }

    // ========================================================================
    // User-defined functions
    // ========================================================================

    fn register_function(&mut self, uri: &Url, decl_range: Range, node: &UserFunctionNode) {
        if schema::is_generic_function(&node.name) {
            self.diagnostic(
                UriRange::new(uri.clone(), node.name_range),
                Severity::Error,
                DiagnosticKind::Name,
                format!("'{}' shadows a built-in function", node.name),
            );
            return;
        }
        if self.functions.contains_key(&node.name) {
            self.diagnostic(
                UriRange::new(uri.clone(), node.name_range),
                Severity::Error,
                DiagnosticKind::Name,
                format!("function '{}' is already defined", node.name),
            );
            return;
        }
        self.functions.insert(
            node.name.clone(),
            UserFunction {
                decl_uri: uri.clone(),
                decl_range,
                params: node.params.clone(),
                body: node.body.clone(),
            },
        );
    }

    /// When the stop cursor sits inside a function body that is only being
    /// declared here, run the body once in a root-like frame with the
    /// parameters bound to unknowns, so the stop fires with the function's
    /// scope in place. Completion is the only consumer of such runs.
    fn probe_declared_body(
        &mut self,
        uri: &Url,
        decl_range: Range,
        node: &UserFunctionNode,
    ) -> Flow<()> {
        let Some((stop_uri, stop_position)) = self.options.stop_at.clone() else {
            return Ok(());
        };
        if &stop_uri != uri || !decl_range.contains(stop_position) {
            return Ok(());
        }
        self.scopes.push_barrier();
        for param in &node.params {
            let lhs_range = UriRange::new(uri.clone(), param.range);
            self.scopes
                .assign_current(&param.name, Value::Unknown, lhs_range.clone());
            self.data.variable_definitions.push(VariableDefinition {
                name: param.name.clone(),
                range: lhs_range.clone(),
                lhs_range,
                value: Value::Unknown,
            });
        }
        let result = self
            .execute_statements(uri, &node.body)
            .and_then(|()| self.check_body_end(uri, decl_range.end));
        self.scopes.pop();
        result
    }

    fn execute_function_call(
        &mut self,
        uri: &Url,
        name: &str,
        name_range: Range,
        args: &[Expression],
    ) -> Flow<()> {
        let Some(function) = self.functions.get(name).cloned() else {
            self.diagnostic(
                UriRange::new(uri.clone(), name_range),
                Severity::Error,
                DiagnosticKind::Name,
                format!("unknown function '{}'", name),
            );
            return Ok(());
        };
        if args.len() != function.params.len() {
            self.diagnostic(
                UriRange::new(uri.clone(), name_range),
                Severity::Error,
                DiagnosticKind::Kind,
                format!(
                    "'{}' expects {} argument(s), got {}",
                    name,
                    function.params.len(),
                    args.len()
                ),
            );
        }
        if self.call_depth >= MAX_CALL_DEPTH {
            self.diagnostic(
                UriRange::new(uri.clone(), name_range),
                Severity::Error,
                DiagnosticKind::Structural,
                format!("call depth limit reached invoking '{}'", name),
            );
            return Ok(());
        }

        // Arguments are read in the caller's scope.
        let mut values = Vec::new();
        for arg in args {
            values.push(self.evaluate_expression(uri, arg)?);
        }

        // The body runs in a root-like frame: no parent chain back to the
        // caller, so `^` resolves nothing inside.
        self.scopes.push_barrier();
        for (param, value) in function.params.iter().zip(values) {
            let lhs_range = UriRange::new(function.decl_uri.clone(), param.range);
            self.scopes
                .assign_current(&param.name, value.clone(), lhs_range.clone());
            self.data.variable_definitions.push(VariableDefinition {
                name: param.name.clone(),
                range: lhs_range.clone(),
                lhs_range,
                value,
            });
        }
        self.call_depth += 1;
        let decl_uri = function.decl_uri.clone();
        let result = self
            .execute_statements(&decl_uri, &function.body)
            .and_then(|()| self.check_body_end(&decl_uri, function.decl_range.end));
        self.call_depth -= 1;
        self.scopes.pop();
        result
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn evaluate_expression(&mut self, uri: &Url, expr: &Expression) -> Flow<Value> {
        match &expr.kind {
            ExpressionKind::Boolean(b) => Ok(Value::Boolean(*b)),
            ExpressionKind::Integer(n) => Ok(Value::Integer(*n)),
            ExpressionKind::String(template) => self.evaluate_string_template(uri, template),
            ExpressionKind::Variable(node) => self.evaluate_variable_read(uri, node),
            ExpressionKind::Array(elements) => self.evaluate_array_literal(uri, elements),
            ExpressionKind::Struct(body) => {
                self.scopes.push();
                let result = self
                    .execute_statements(uri, body)
                    .and_then(|()| self.check_body_end(uri, expr.range.end));
                let frame = self.scopes.pop();
                result?;
                let mut fields = StructValue::new();
                for (name, binding) in frame.bindings {
                    fields.fields.insert(
                        name,
                        StructField {
                            value: binding.value,
                            definitions: binding.definitions,
                        },
                    );
                }
                Ok(Value::Struct(fields))
            }
            ExpressionKind::Binary { op, lhs, rhs } => {
                let left = self.evaluate_expression(uri, lhs)?;
                let right = self.evaluate_expression(uri, rhs)?;
                Ok(self.apply_binary(uri, expr.range, *op, left, right))
            }
            ExpressionKind::Not(inner) => {
                let value = self.evaluate_expression(uri, inner)?;
                match value {
                    Value::Boolean(b) => Ok(Value::Boolean(!b)),
                    Value::Unknown => Ok(Value::Unknown),
                    other => {
                        self.diagnostic(
                            UriRange::new(uri.clone(), inner.range),
                            Severity::Error,
                            DiagnosticKind::Kind,
                            format!("'!' expects a Boolean, got {}", other.kind()),
                        );
                        Ok(Value::Unknown)
                    }
                }
            }
        }
    }

    fn evaluate_array_literal(&mut self, uri: &Url, elements: &[Expression]) -> Flow<Value> {
        let mut result = Value::ArrayOfStrings(Vec::new());
        for element in elements {
            let value = self.evaluate_expression(uri, element)?;
            if value.is_unknown() {
                continue;
            }
            // Array elements splice: a nested array contributes its
            // elements, matching what `+` does.
            let mut notes = Vec::new();
            match result.add(value, &mut notes) {
                Ok(combined) => result = combined,
                Err(err) => {
                    self.diagnostic(
                        UriRange::new(uri.clone(), element.range),
                        Severity::Error,
                        DiagnosticKind::Kind,
                        format!("invalid array element: {}", err),
                    );
                    return Ok(Value::Unknown);
                }
            }
            for note in notes {
                self.diagnostic(
                    UriRange::new(uri.clone(), element.range),
                    Severity::Warning,
                    DiagnosticKind::Kind,
                    note,
                );
            }
        }
        Ok(result)
    }

    fn apply_binary(
        &mut self,
        uri: &Url,
        range: Range,
        op: BinaryOp,
        left: Value,
        right: Value,
    ) -> Value {
        use BinaryOp::*;
        if left.is_unknown() || right.is_unknown() {
            return Value::Unknown;
        }
        let mismatch = |this: &mut Self| {
            this.diagnostic(
                UriRange::new(uri.clone(), range),
                Severity::Error,
                DiagnosticKind::Kind,
                format!(
                    "'{}' cannot combine {} and {}",
                    op.symbol(),
                    left.kind(),
                    right.kind()
                ),
            );
            Value::Unknown
        };
        match op {
            Add => {
                let mut notes = Vec::new();
                let result = left.clone().add(right.clone(), &mut notes);
                for note in notes {
                    self.diagnostic(
                        UriRange::new(uri.clone(), range),
                        Severity::Warning,
                        DiagnosticKind::Kind,
                        note,
                    );
                }
                match result {
                    Ok(value) => value,
                    Err(_) => mismatch(self),
                }
            }
            Subtract => match left.clone().subtract(right.clone()) {
                Ok(value) => value,
                Err(_) => mismatch(self),
            },
            Equal | NotEqual => {
                let equal = match (&left, &right) {
                    (Value::String(a), Value::String(b)) => a == b,
                    (Value::Integer(a), Value::Integer(b)) => a == b,
                    (Value::Boolean(a), Value::Boolean(b)) => a == b,
                    _ => return mismatch(self),
                };
                Value::Boolean(if op == Equal { equal } else { !equal })
            }
            Less | LessOrEqual | Greater | GreaterOrEqual => {
                let ordering = match (&left, &right) {
                    (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
                    (Value::String(a), Value::String(b)) => a.cmp(b),
                    _ => return mismatch(self),
                };
                let holds = match op {
                    Less => ordering.is_lt(),
                    LessOrEqual => ordering.is_le(),
                    Greater => ordering.is_gt(),
                    _ => ordering.is_ge(),
                };
                Value::Boolean(holds)
            }
            And | Or => match (&left, &right) {
                (Value::Boolean(a), Value::Boolean(b)) => {
                    Value::Boolean(if op == And { *a && *b } else { *a || *b })
                }
                _ => mismatch(self),
            },
            In | NotIn => {
                let contained = match (&left, &right) {
                    (Value::String(needle), Value::ArrayOfStrings(haystack)) => {
                        haystack.contains(needle)
                    }
                    (Value::ArrayOfStrings(needles), Value::ArrayOfStrings(haystack)) => {
                        needles.iter().any(|needle| haystack.contains(needle))
                    }
                    _ => return mismatch(self),
                };
                Value::Boolean(if op == In { contained } else { !contained })
            }
        }
    }

    fn expect_boolean(&mut self, uri: &Url, range: Range, value: Value) -> Option<bool> {
        match value {
            Value::Boolean(b) => Some(b),
            Value::Unknown => None,
            other => {
                self.diagnostic(
                    UriRange::new(uri.clone(), range),
                    Severity::Error,
                    DiagnosticKind::Kind,
                    format!("condition must be a Boolean, got {}", other.kind()),
                );
                None
            }
        }
    }

    // ========================================================================
    // Variable reads and dynamic names
    // ========================================================================

    /// Evaluate a string literal: resolve every substitution segment
    /// (emitting one reference per segment) and concatenate. Inside a
    /// target-reference property the resulting literal also emits a target
    /// reference.
    fn evaluate_string_template(&mut self, uri: &Url, template: &StringTemplate) -> Flow<Value> {
        let mut text = String::new();
        let mut failed = false;
        for part in &template.parts {
            match part {
                StringPart::Literal(literal) => text.push_str(literal),
                StringPart::Substitution(substitution) => {
                    let binding = match substitution.sigil {
                        Sigil::Dot => self.scopes.lookup(&substitution.name),
                        Sigil::Caret => self.scopes.lookup_from_parent(&substitution.name),
                    };
                    match binding {
                        Some(binding) => {
                            let definitions = binding.definitions.clone();
                            let value = binding.value.clone();
                            self.emit_reference(uri, substitution.range, definitions);
                            match value.substitution_string() {
                                Some(s) => text.push_str(&s),
                                None => {
                                    if !value.is_unknown() {
                                        self.diagnostic(
                                            UriRange::new(uri.clone(), substitution.range),
                                            Severity::Error,
                                            DiagnosticKind::Kind,
                                            format!(
                                                "cannot interpolate {} into a string",
                                                value.kind()
                                            ),
                                        );
                                    }
                                    failed = true;
                                }
                            }
                        }
                        None => {
                            self.emit_reference(uri, substitution.range, Vec::new());
                            self.undefined_read_diagnostic(
                                uri,
                                substitution.range,
                                substitution.sigil,
                                &substitution.name,
                            );
                            failed = true;
                        }
                    }
                }
            }
        }
        if failed {
            return Ok(Value::Unknown);
        }
        if self.target_ref_depth > 0 {
            self.data.target_references.push(TargetReference {
                string_range: UriRange::new(uri.clone(), template.range),
                candidate_names: vec![text.clone()],
            });
        }
        Ok(Value::String(text))
    }

    /// Compute the name a variable node denotes; dynamic names emit one
    /// reference per substitution segment on the way.
    fn resolve_variable_name(&mut self, uri: &Url, node: &VariableNode) -> Flow<Option<String>> {
        match &node.name {
            VariableName::Static(name) => Ok(Some(name.clone())),
            VariableName::Dynamic(template) => {
                // A computed name is never itself a target reference.
                let depth = std::mem::take(&mut self.target_ref_depth);
                let value = self.evaluate_string_template(uri, template);
                self.target_ref_depth = depth;
                match value? {
                    Value::String(name) => Ok(Some(name)),
                    _ => Ok(None),
                }
            }
        }
    }

    fn evaluate_variable_read(&mut self, uri: &Url, node: &VariableNode) -> Flow<Value> {
        let name = self.resolve_variable_name(uri, node)?;
        let is_dynamic = matches!(node.name, VariableName::Dynamic(_));

        let Some(name) = name else {
            // The segment that failed has already produced its diagnostic;
            // the composite read is still recorded, unresolved.
            self.emit_reference(uri, node.range, Vec::new());
            return Ok(Value::Unknown);
        };

        let binding = match node.sigil {
            Sigil::Dot => self.scopes.lookup(&name),
            Sigil::Caret => self.scopes.lookup_from_parent(&name),
        };
        match binding {
            Some(binding) => {
                let definitions = binding.definitions.clone();
                let value = binding.value.clone();
                self.emit_reference(uri, node.range, definitions);
                Ok(value)
            }
            None => {
                self.emit_reference(uri, node.range, Vec::new());
                if is_dynamic {
                    // The name was computed; report it so the message names
                    // the variable actually looked up.
                    self.diagnostic(
                        UriRange::new(uri.clone(), node.range),
                        Severity::Error,
                        DiagnosticKind::Name,
                        format!("undefined variable '{}' (computed name)", name),
                    );
                } else {
                    self.undefined_read_diagnostic(uri, node.range, node.sigil, &name);
                }
                Ok(Value::Unknown)
            }
        }
    }

    fn undefined_read_diagnostic(&mut self, uri: &Url, range: Range, sigil: Sigil, name: &str) {
        let message = match sigil {
            Sigil::Dot => format!("undefined variable '.{}'", name),
            Sigil::Caret => {
                if self.scopes.parent_frame().is_none() {
                    format!("'^{}' read without a parent scope", name)
                } else {
                    format!("undefined variable '^{}'", name)
                }
            }
        };
        self.diagnostic(
            UriRange::new(uri.clone(), range),
            Severity::Error,
            DiagnosticKind::Name,
            message,
        );
    }

    // ========================================================================
    // Emission helpers
    // ========================================================================

    fn emit_reference(&mut self, uri: &Url, range: Range, definitions: Vec<UriRange>) {
        let mut deduped: Vec<UriRange> = Vec::with_capacity(definitions.len());
        for definition in definitions {
            if !deduped.contains(&definition) {
                deduped.push(definition);
            }
        }
        self.data.variable_references.push(VariableReference {
            reference_range: UriRange::new(uri.clone(), range),
            definitions: deduped,
        });
    }

    fn diagnostic(
        &mut self,
        range: UriRange,
        severity: Severity,
        kind: DiagnosticKind,
        message: impl Into<String>,
    ) {
        self.data.diagnostics.push(Diagnostic {
            range,
            severity,
            kind,
            message: message.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySourceProvider;
    use pretty_assertions::assert_eq;

    fn root() -> Url {
        Url::parse("file:///build/fbuild.bff").unwrap()
    }

    fn eval_source(text: &str) -> EvaluatedData {
        let provider = MemorySourceProvider::new().with_document(root(), text);
        evaluate(&root(), &provider, &ParseCache::new(), EvalOptions::default())
    }

    fn at(line: u32, start: u32, end: u32) -> UriRange {
        UriRange::new(root(), Range::on_line(line, start, end))
    }

    #[test]
    fn test_basic_definition_and_reference() {
        let data = eval_source(".A = 1\nPrint( .A )");
        assert!(data.diagnostics.is_empty(), "{:?}", data.diagnostics);

        assert_eq!(data.variable_definitions.len(), 1);
        let definition = &data.variable_definitions[0];
        assert_eq!(definition.name, "A");
        assert_eq!(definition.lhs_range, at(0, 0, 2));
        assert_eq!(definition.value, Value::Integer(1));

        assert_eq!(data.variable_references.len(), 1);
        let reference = &data.variable_references[0];
        assert_eq!(reference.reference_range, at(1, 7, 9));
        assert_eq!(reference.definitions, vec![at(0, 0, 2)]);
    }

    #[test]
    fn test_dynamic_name_emits_inner_then_outer() {
        let data = eval_source(".A_B_C = 'foo'\n.Middle = 'B'\nPrint( .\"A_$Middle$_C\" )");
        assert!(data.diagnostics.is_empty(), "{:?}", data.diagnostics);

        let position = Position::new(2, 12);
        let refs = data.references_at(&root(), position);
        assert_eq!(refs.len(), 2);
        // Inner $Middle$ segment first, composite read second.
        assert_eq!(refs[0].reference_range, at(2, 11, 19));
        assert_eq!(refs[0].definitions, vec![at(1, 0, 7)]);
        assert_eq!(refs[1].reference_range, at(2, 7, 22));
        assert_eq!(refs[1].definitions, vec![at(0, 0, 6)]);
    }

    #[test]
    fn test_using_fans_out_definitions() {
        let data = eval_source(".S = [ .A = 1 ]\nUsing( .S )\nPrint( .A )");
        assert!(data.diagnostics.is_empty(), "{:?}", data.diagnostics);

        let read = data
            .variable_references
            .iter()
            .find(|r| r.reference_range == at(2, 7, 9))
            .expect("read of .A");
        assert_eq!(read.definitions, vec![at(1, 0, 11), at(0, 7, 9)]);

        // Using itself emitted a definition whose lhs is the call range.
        assert!(data
            .variable_definitions
            .iter()
            .any(|d| d.name == "A" && d.lhs_range == at(1, 0, 11)));
    }

    #[test]
    fn test_parent_scope_assignment_and_read() {
        let data = eval_source(".Out = 1\n{\n  ^Out = 2\n  Print( ^Out )\n}\nPrint( .Out )");
        assert!(data.diagnostics.is_empty(), "{:?}", data.diagnostics);

        // The final read sees the value written through the parent sigil.
        let last = data.variable_definitions.last().unwrap();
        assert_eq!(last.value, Value::Integer(2));
        let final_read = data.variable_references.last().unwrap();
        assert_eq!(final_read.definitions, vec![at(2, 2, 6)]);
    }

    #[test]
    fn test_parent_assignment_without_parent_reports() {
        let data = eval_source("^Orphan = 1");
        assert_eq!(data.diagnostics.len(), 1);
        assert_eq!(data.diagnostics[0].kind, DiagnosticKind::Name);
        assert!(data.diagnostics[0].message.contains("no parent scope"));
    }

    #[test]
    fn test_compound_append_reads_then_defines() {
        let data = eval_source(".A = 'x'\n.A += 'y'\nPrint( .A )");
        assert!(data.diagnostics.is_empty(), "{:?}", data.diagnostics);

        // Two definitions, monotonic: the first entry is never rewritten.
        assert_eq!(data.variable_definitions.len(), 2);
        assert_eq!(data.variable_definitions[0].value, Value::String("x".into()));
        assert_eq!(data.variable_definitions[1].value, Value::String("xy".into()));

        // The += emitted a read of the previous definition.
        assert_eq!(data.variable_references[0].reference_range, at(1, 0, 2));
        assert_eq!(data.variable_references[0].definitions, vec![at(0, 0, 2)]);
        // The final read resolves to the += site.
        assert_eq!(
            data.variable_references.last().unwrap().definitions,
            vec![at(1, 0, 2)]
        );
    }

    #[test]
    fn test_compound_on_undefined_reports_and_assigns() {
        let data = eval_source(".A += 'x'\nPrint( .A )");
        assert_eq!(data.diagnostics.len(), 1);
        assert!(data.diagnostics[0].message.contains("modified before"));
        // Best effort: behaves like '=' afterwards.
        assert_eq!(
            data.variable_definitions[0].value,
            Value::String("x".into())
        );
    }

    #[test]
    fn test_subtract_statement() {
        let data = eval_source(".List = { 'a', 'b' }\n.List - 'a'\nPrint( .List )");
        assert!(data.diagnostics.is_empty(), "{:?}", data.diagnostics);
        assert_eq!(
            data.variable_definitions[1].value,
            Value::ArrayOfStrings(vec!["b".into()])
        );
    }

    #[test]
    fn test_kind_mismatch_reports_once_then_stays_silent() {
        let data = eval_source(".X = 1 + 'a'\n.Y = .X + 2\nPrint( .Y )");
        assert_eq!(data.diagnostics.len(), 1);
        assert_eq!(data.diagnostics[0].kind, DiagnosticKind::Kind);
        assert_eq!(data.variable_definitions[1].value, Value::Unknown);
    }

    #[test]
    fn test_undefined_read_reports_with_empty_definitions() {
        let data = eval_source("Print( .Missing )");
        assert_eq!(data.diagnostics.len(), 1);
        assert!(data.diagnostics[0].message.contains(".Missing"));
        assert_eq!(data.variable_references.len(), 1);
        assert!(data.variable_references[0].definitions.is_empty());
    }

    #[test]
    fn test_scope_block_shadowing() {
        let data = eval_source(".V = 1\n{\n  .V = 2\n  Print( .V )\n}\nPrint( .V )");
        assert!(data.diagnostics.is_empty(), "{:?}", data.diagnostics);
        let inner = &data.variable_references[0];
        assert_eq!(inner.definitions, vec![at(2, 2, 4)]);
        let outer = &data.variable_references[1];
        assert_eq!(outer.definitions, vec![at(0, 0, 2)]);
    }

    #[test]
    fn test_for_each_definitions_per_iteration() {
        let data = eval_source(".Items = { 'a', 'b' }\nForEach( .It in .Items )\n{\n  Print( .It )\n}");
        assert!(data.diagnostics.is_empty(), "{:?}", data.diagnostics);

        let loop_defs: Vec<_> = data
            .variable_definitions
            .iter()
            .filter(|d| d.name == "It")
            .collect();
        assert_eq!(loop_defs.len(), 2);
        // Both iterations share the header span as lhs.
        assert!(loop_defs.iter().all(|d| d.lhs_range == at(1, 9, 12)));
        assert_eq!(loop_defs[0].value, Value::String("a".into()));
        assert_eq!(loop_defs[1].value, Value::String("b".into()));

        // Both body reads resolve to the header span.
        let reads: Vec<_> = data
            .variable_references
            .iter()
            .filter(|r| r.reference_range == at(3, 9, 12))
            .collect();
        assert_eq!(reads.len(), 2);
    }

    #[test]
    fn test_for_each_length_mismatch() {
        let data = eval_source(
            ".Xs = { 'a', 'b' }\n.Ys = { '1' }\nForEach( .X in .Xs, .Y in .Ys )\n{\n  Print( .X )\n}",
        );
        assert_eq!(data.diagnostics.len(), 1);
        assert_eq!(data.diagnostics[0].kind, DiagnosticKind::Structural);
        // Iterates min(len) times.
        let reads: Vec<_> = data
            .variable_references
            .iter()
            .filter(|r| r.reference_range.range.start.line == 4)
            .collect();
        assert_eq!(reads.len(), 1);
    }

    #[test]
    fn test_for_each_over_structs_with_using() {
        let data = eval_source(
            ".S1 = [ .Field = 'one' ]\n.S2 = [ .Field = 'two' ]\n.All = { .S1, .S2 }\nForEach( .E in .All )\n{\n  Using( .E )\n  Print( .Field )\n}",
        );
        assert!(data.diagnostics.is_empty(), "{:?}", data.diagnostics);
        let reads: Vec<_> = data
            .variable_references
            .iter()
            .filter(|r| r.reference_range.range.start.line == 6)
            .collect();
        assert_eq!(reads.len(), 2);
        // Iteration 1 candidates: the Using site and the first struct's field.
        assert_eq!(reads[0].definitions, vec![at(5, 2, 13), at(0, 8, 14)]);
        // Iteration 2 candidates point at the second struct's field.
        assert_eq!(reads[1].definitions, vec![at(5, 2, 13), at(1, 8, 14)]);
    }

    #[test]
    fn test_if_else_branches_and_in_operator() {
        let data = eval_source(
            ".Known = { 'x' }\nIf( 'x' in .Known )\n{\n  .Hit = true\n}\nIf( 'y' in .Known )\n{\n  .Miss = true\n}\nElse\n{\n  .Other = true\n}",
        );
        assert!(data.diagnostics.is_empty(), "{:?}", data.diagnostics);
        let names: Vec<_> = data
            .variable_definitions
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert!(names.contains(&"Hit"));
        assert!(!names.contains(&"Miss"));
        assert!(names.contains(&"Other"));
    }

    #[test]
    fn test_generic_function_emits_model_entries() {
        let data = eval_source("Alias( 'T' )\n{\n  .Targets = { 'A', 'B' }\n}");
        // Missing targets A and B are not diagnosed (they may live in other
        // roots); only schema problems are.
        assert!(data.diagnostics.is_empty(), "{:?}", data.diagnostics);

        let invocations = &data.generic_functions[&root()];
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].function_name, "Alias");
        assert_eq!(invocations[0].target_name.as_deref(), Some("T"));
        assert_eq!(invocations[0].body_range.range.start, Position::new(1, 1));

        assert_eq!(data.target_definitions["T"].name_range, at(0, 7, 10));

        assert_eq!(data.target_references.len(), 2);
        assert_eq!(data.target_references[0].candidate_names, vec!["A"]);
        assert_eq!(data.target_references[0].string_range, at(2, 15, 18));
        assert_eq!(data.target_references[1].candidate_names, vec!["B"]);
    }

    #[test]
    fn test_generic_function_schema_validation() {
        let data = eval_source("Alias( 'T' )\n{\n  .Targets = 7\n  .Bogus = 'x'\n}");
        let messages: Vec<_> = data.diagnostics.iter().map(|d| d.message.as_str()).collect();
        assert!(messages.iter().any(|m| m.contains("property 'Targets' must be")));
        assert!(messages.iter().any(|m| m.contains("unknown property 'Bogus'")));
    }

    #[test]
    fn test_generic_function_missing_required() {
        let data = eval_source("Alias( 'T' )\n{\n  .Hidden = true\n}");
        assert_eq!(data.diagnostics.len(), 1);
        assert!(data.diagnostics[0]
            .message
            .contains("missing required property 'Targets'"));
    }

    #[test]
    fn test_duplicate_target() {
        let data = eval_source(
            "Alias( 'T' )\n{\n  .Targets = { 'A' }\n}\nAlias( 'T' )\n{\n  .Targets = { 'B' }\n}",
        );
        assert_eq!(data.diagnostics.len(), 1);
        assert!(data.diagnostics[0].message.contains("duplicate target 'T'"));
        assert_eq!(data.duplicate_target_definitions.len(), 1);
        assert_eq!(data.duplicate_target_definitions[0].name_range.range.start.line, 4);
        // The original definition wins the table slot.
        assert_eq!(data.target_definitions["T"].name_range.range.start.line, 0);
    }

    #[test]
    fn test_unknown_generic_function_body_still_runs() {
        let data = eval_source("Frobnicate( 'T' )\n{\n  .X = 1\n}");
        assert!(data
            .diagnostics
            .iter()
            .any(|d| d.message.contains("unknown function 'Frobnicate'")));
        // The body's assignment was still evaluated.
        assert!(data.variable_definitions.iter().any(|d| d.name == "X"));
        // But no invocation is recorded for an unknown function.
        assert!(!data.generic_functions.contains_key(&root()));
    }

    #[test]
    fn test_nested_generic_function_is_rejected() {
        let data = eval_source(
            "Alias( 'T' )\n{\n  Alias( 'U' )\n  {\n    .Targets = { 'X' }\n  }\n  .Targets = { 'A' }\n}",
        );
        assert!(data
            .diagnostics
            .iter()
            .any(|d| d.message.contains("cannot be nested")));
        // Only the outer invocation is recorded.
        assert_eq!(data.generic_functions[&root()].len(), 1);
        assert_eq!(
            data.generic_functions[&root()][0].target_name.as_deref(),
            Some("T")
        );
    }

    #[test]
    fn test_settings_rejects_target_name() {
        let data = eval_source("Settings( 'nope' )\n{\n}");
        assert!(data
            .diagnostics
            .iter()
            .any(|d| d.message.contains("does not take a target name")));
    }

    #[test]
    fn test_directive_if_define() {
        let data = eval_source("#define FAST\n#if FAST\n.A = 1\n#else\n.A = 2\n#endif");
        assert!(data.diagnostics.is_empty(), "{:?}", data.diagnostics);
        assert_eq!(data.variable_definitions.len(), 1);
        assert_eq!(data.variable_definitions[0].value, Value::Integer(1));
    }

    #[test]
    fn test_directive_if_undefined_takes_else() {
        let data = eval_source("#if NEVER_DEFINED\n.A = 1\n#else\n.A = 2\n#endif");
        assert_eq!(data.variable_definitions[0].value, Value::Integer(2));
    }

    #[test]
    fn test_stop_at_yields_prefix_and_snapshot() {
        let text = ".A = 1\n.B = 2\n.C = 3";
        let provider = MemorySourceProvider::new().with_document(root(), text);
        let cache = ParseCache::new();

        let full = evaluate(&root(), &provider, &cache, EvalOptions::default());
        let partial = evaluate(
            &root(),
            &provider,
            &cache,
            EvalOptions::stop_at(root(), Position::new(2, 0)),
        );

        assert_eq!(partial.variable_definitions.len(), 2);
        // Prefix of the full evaluation.
        assert_eq!(
            full.variable_definitions[..2],
            partial.variable_definitions[..]
        );
        let snapshot = partial.scope_snapshot.expect("snapshot at stop");
        let names: Vec<_> = snapshot.current_scope.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert!(full.scope_snapshot.is_none());
    }

    #[test]
    fn test_stop_inside_block_sees_parent_scope() {
        let text = ".Outer = 1\n{\n  .Inner = 2\n  .After = 3\n}";
        let provider = MemorySourceProvider::new().with_document(root(), text);
        let cache = ParseCache::new();
        let data = evaluate(
            &root(),
            &provider,
            &cache,
            EvalOptions::stop_at(root(), Position::new(3, 2)),
        );
        let snapshot = data.scope_snapshot.expect("snapshot at stop");
        let parent: Vec<_> = snapshot.parent_scope.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(parent, vec!["Outer"]);
        let current: Vec<_> = snapshot.current_scope.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(current, vec!["Inner", "Outer"]);
    }

    #[test]
    fn test_cancellation_returns_partial_data() {
        let token = CancelToken::new();
        token.cancel();
        let provider = MemorySourceProvider::new().with_document(root(), ".A = 1\n.B = 2");
        let options = EvalOptions {
            cancel: Some(token),
            ..EvalOptions::default()
        };
        let data = evaluate(&root(), &provider, &ParseCache::new(), options);
        assert!(data.variable_definitions.is_empty());
        assert_eq!(data.diagnostics.len(), 1);
        assert_eq!(data.diagnostics[0].kind, DiagnosticKind::Canceled);
    }

    #[test]
    fn test_user_function_body_cannot_see_caller() {
        let data = eval_source(
            ".Caller = 1\nfunction Render(.Arg)\n{\n  .Local = .Arg\n  Print( .Caller )\n}\nRender( 'v' )",
        );
        // Exactly one diagnostic: the caller variable is invisible inside.
        assert_eq!(data.diagnostics.len(), 1);
        assert!(data.diagnostics[0].message.contains(".Caller"));

        // The parameter was bound with the declaration span as its lhs.
        let param_def = data
            .variable_definitions
            .iter()
            .find(|d| d.name == "Arg")
            .unwrap();
        assert_eq!(param_def.lhs_range, at(1, 16, 20));
        assert_eq!(param_def.value, Value::String("v".into()));
    }

    #[test]
    fn test_user_function_unknown_and_arity() {
        let data = eval_source("function F(.A)\n{\n}\nF( 'x', 'y' )\nG( 1 )");
        let messages: Vec<_> = data.diagnostics.iter().map(|d| d.message.as_str()).collect();
        assert!(messages.iter().any(|m| m.contains("expects 1 argument")));
        assert!(messages.iter().any(|m| m.contains("unknown function 'G'")));
    }

    #[test]
    fn test_reference_definitions_are_closed() {
        let data = eval_source(
            ".S = [ .A = 1 ]\nUsing( .S )\nPrint( .A )\n.B = 'x'\n.B += 'y'\nPrint( .B )",
        );
        let lhs_ranges: Vec<_> = data
            .variable_definitions
            .iter()
            .map(|d| d.lhs_range.clone())
            .collect();
        for reference in &data.variable_references {
            for definition in &reference.definitions {
                assert!(
                    lhs_ranges.contains(definition),
                    "dangling definition {:?}",
                    definition
                );
            }
        }
    }

    #[test]
    fn test_reevaluation_is_deterministic() {
        let text = ".A = 1\n.B = .A + 1\nAlias( 'T' )\n{\n  .Targets = { 'X' }\n}\nPrint( .Missing )";
        let provider = MemorySourceProvider::new().with_document(root(), text);
        let cache = ParseCache::new();
        let first = evaluate(&root(), &provider, &cache, EvalOptions::default());
        let second = evaluate(&root(), &provider, &cache, EvalOptions::default());
        assert_eq!(first, second);
    }
}
