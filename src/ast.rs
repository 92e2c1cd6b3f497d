// ABOUTME: Parse-tree nodes for BFF statements and expressions, each carrying its source range

use crate::range::Range;

/// The sigil introducing a variable name: `.` resolves from the current
/// frame, `^` from the nearest enclosing parent frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sigil {
    Dot,
    Caret,
}

/// A `$name$` or `^name^` marker inside a double-quoted string.
#[derive(Debug, Clone, PartialEq)]
pub struct Substitution {
    pub name: String,
    pub sigil: Sigil,
    /// Inclusive span of the whole marker, delimiters included.
    pub range: Range,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StringPart {
    Literal(String),
    Substitution(Substitution),
}

/// A quoted string, represented as a sequence of literal and substitution
/// segments. Single-quoted strings never contain substitutions.
#[derive(Debug, Clone, PartialEq)]
pub struct StringTemplate {
    pub parts: Vec<StringPart>,
    /// Span of the literal including its quotes.
    pub range: Range,
}

impl StringTemplate {
    pub fn has_substitutions(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, StringPart::Substitution(_)))
    }

    /// The literal text when no substitution is present.
    pub fn literal_text(&self) -> Option<String> {
        if self.has_substitutions() {
            return None;
        }
        let mut out = String::new();
        for part in &self.parts {
            if let StringPart::Literal(text) = part {
                out.push_str(text);
            }
        }
        Some(out)
    }
}

/// A variable name on either side of an assignment or in a read position.
#[derive(Debug, Clone, PartialEq)]
pub enum VariableName {
    Static(String),
    /// `."A_$Middle$_C"`: the name itself is computed at evaluation time.
    Dynamic(StringTemplate),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableNode {
    pub sigil: Sigil,
    pub name: VariableName,
    /// Span including the sigil (and quotes for a dynamic name).
    pub range: Range,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    And,
    Or,
    In,
    NotIn,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessOrEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterOrEqual => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::In => "in",
            BinaryOp::NotIn => "not in",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub kind: ExpressionKind,
    pub range: Range,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionKind {
    Boolean(bool),
    Integer(i64),
    String(StringTemplate),
    Variable(VariableNode),
    /// `{ expr, expr, … }`
    Array(Vec<Expression>),
    /// `[ stmts ]` — evaluated in a fresh frame whose bindings become fields.
    Struct(Vec<Statement>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    Not(Box<Expression>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    /// `=`
    Set,
    /// `+=`
    Concat,
    /// `-` applied in place to the variable
    Subtract,
}

/// One `.name in expr` clause of a `ForEach` header.
#[derive(Debug, Clone, PartialEq)]
pub struct ForEachIterator {
    pub variable: VariableNode,
    pub array: Expression,
}

/// A built-in keyword block such as `Alias('name') { … }`.
#[derive(Debug, Clone, PartialEq)]
pub struct GenericFunctionNode {
    pub name: String,
    pub name_range: Range,
    /// The quoted target name between the parentheses, when present.
    pub target: Option<Expression>,
    /// Span from the function keyword through the closing parenthesis.
    pub header_range: Range,
    pub body: Vec<Statement>,
    /// Span strictly inside the braces.
    pub body_range: Range,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionParam {
    pub name: String,
    /// Span of `.name` in the declaration header.
    pub range: Range,
}

/// `function Name(.a, .b) { … }`
#[derive(Debug, Clone, PartialEq)]
pub struct UserFunctionNode {
    pub name: String,
    pub name_range: Range,
    pub params: Vec<FunctionParam>,
    pub body: Vec<Statement>,
}

/// Predicate of a `#if` directive: defined-name tests combined with
/// `!`, `&&`, and `||`.
#[derive(Debug, Clone, PartialEq)]
pub enum DirectiveCondition {
    Defined { name: String, range: Range },
    Not(Box<DirectiveCondition>),
    And(Box<DirectiveCondition>, Box<DirectiveCondition>),
    Or(Box<DirectiveCondition>, Box<DirectiveCondition>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub range: Range,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    Assign {
        lhs: VariableNode,
        op: AssignOp,
        rhs: Expression,
    },
    Using {
        expr: Expression,
    },
    ForEach {
        iterators: Vec<ForEachIterator>,
        body: Vec<Statement>,
    },
    If {
        condition: Expression,
        then_body: Vec<Statement>,
        else_body: Option<Vec<Statement>>,
    },
    Print {
        expr: Expression,
    },
    /// A bare `{ … }` scope block.
    Block(Vec<Statement>),
    GenericFunction(GenericFunctionNode),
    Include {
        path: StringTemplate,
    },
    Once,
    Define {
        name: String,
        name_range: Range,
    },
    Undef {
        name: String,
        name_range: Range,
    },
    DirectiveIf {
        condition: DirectiveCondition,
        then_body: Vec<Statement>,
        else_body: Vec<Statement>,
    },
    FunctionDecl(UserFunctionNode),
    FunctionCall {
        name: String,
        name_range: Range,
        args: Vec<Expression>,
    },
}
