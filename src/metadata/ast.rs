//! Syntax tree handed to the metadata parser by the external TSDL grammar
//! front end. The shapes here are grammar output, not raw text: assignment
//! sides arrive as runs of unary tokens and compound types arrive already
//! bracketed into type specifiers.

/// One top-level declaration block in a TSDL document.
#[derive(Clone, Debug, PartialEq)]
pub enum RootNode {
    Trace(Vec<AssignmentExpr>),
    Environment(Vec<AssignmentExpr>),
    Clock(Vec<AssignmentExpr>),
    Stream(Vec<AssignmentExpr>),
    Event(Vec<AssignmentExpr>),
}

/// `left = right;` inside a declaration block.
#[derive(Clone, Debug, PartialEq)]
pub struct AssignmentExpr {
    /// Left-hand side as the grammar's unary-string run, e.g.
    /// `event.header` arrives as `["event", "header"]`
    pub left: Vec<String>,
    pub right: RightExpr,
}

impl AssignmentExpr {
    pub fn new(left: &[&str], right: RightExpr) -> Self {
        AssignmentExpr {
            left: left.iter().map(|s| s.to_string()).collect(),
            right,
        }
    }

    /// The left-hand keyword with dotted components rejoined.
    pub fn keyword(&self) -> String {
        self.left.join(".")
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RightExpr {
    Unary(Vec<UnaryExpr>),
    Type(TypeSpecifier),
}

/// A single unary token on the right-hand side of an assignment.
#[derive(Clone, Debug, PartialEq)]
pub enum UnaryExpr {
    String(String),
    Unsigned(u64),
    Signed(i64),
}

/// A TSDL type as produced by the grammar, prior to declaration parsing.
#[derive(Clone, Debug, PartialEq)]
pub enum TypeSpecifier {
    Integer(Vec<AssignmentExpr>),
    FloatingPoint(Vec<AssignmentExpr>),
    String(Vec<AssignmentExpr>),
    Struct {
        fields: Vec<(String, TypeSpecifier)>,
        align: Option<u64>,
    },
    Enum {
        container: Option<Box<TypeSpecifier>>,
        /// (label, lo, hi); single-value mappings have lo == hi
        mappings: Vec<(String, i64, i64)>,
    },
    Variant {
        tag: String,
        options: Vec<(String, TypeSpecifier)>,
    },
    Array {
        length: u64,
        element: Box<TypeSpecifier>,
    },
    Sequence {
        length_field: String,
        element: Box<TypeSpecifier>,
    },
}
