use strum::{EnumIter, EnumString, FromRepr, IntoStaticStr};

/// Opcodes at or above this value carry a 2-byte little-endian argument.
pub const HAVE_ARGUMENT: u8 = 90;

/// CPython 3.4 opcodes.
///
/// The discriminants are the on-disk byte values. Mnemonics come from the
/// variant names (`LoadConst` -> `LOAD_CONST`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, EnumIter, IntoStaticStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum Opcode {
    PopTop = 1,
    RotTwo = 2,
    RotThree = 3,
    DupTop = 4,
    DupTopTwo = 5,
    Nop = 9,

    UnaryPositive = 10,
    UnaryNegative = 11,
    UnaryNot = 12,
    UnaryInvert = 15,

    BinaryPower = 19,
    BinaryMultiply = 20,
    BinaryModulo = 22,
    BinaryAdd = 23,
    BinarySubtract = 24,
    BinarySubscr = 25,
    BinaryFloorDivide = 26,
    BinaryTrueDivide = 27,
    InplaceFloorDivide = 28,
    InplaceTrueDivide = 29,

    StoreMap = 54,
    InplaceAdd = 55,
    InplaceSubtract = 56,
    InplaceMultiply = 57,
    InplaceModulo = 59,
    StoreSubscr = 60,
    DeleteSubscr = 61,
    BinaryLshift = 62,
    BinaryRshift = 63,
    BinaryAnd = 64,
    BinaryXor = 65,
    BinaryOr = 66,
    InplacePower = 67,
    GetIter = 68,
    PrintExpr = 70,
    LoadBuildClass = 71,
    YieldFrom = 72,
    InplaceLshift = 75,
    InplaceRshift = 76,
    InplaceAnd = 77,
    InplaceXor = 78,
    InplaceOr = 79,
    BreakLoop = 80,
    WithCleanup = 81,
    ReturnValue = 83,
    ImportStar = 84,
    YieldValue = 86,
    PopBlock = 87,
    EndFinally = 88,
    PopExcept = 89,

    // Everything below takes an argument.
    StoreName = 90,
    DeleteName = 91,
    UnpackSequence = 92,
    ForIter = 93,
    UnpackEx = 94,
    StoreAttr = 95,
    DeleteAttr = 96,
    StoreGlobal = 97,
    DeleteGlobal = 98,
    LoadConst = 100,
    LoadName = 101,
    BuildTuple = 102,
    BuildList = 103,
    BuildSet = 104,
    BuildMap = 105,
    LoadAttr = 106,
    CompareOp = 107,
    ImportName = 108,
    ImportFrom = 109,
    JumpForward = 110,
    JumpIfFalseOrPop = 111,
    JumpIfTrueOrPop = 112,
    JumpAbsolute = 113,
    PopJumpIfFalse = 114,
    PopJumpIfTrue = 115,
    LoadGlobal = 116,
    ContinueLoop = 119,
    SetupLoop = 120,
    SetupExcept = 121,
    SetupFinally = 122,
    LoadFast = 124,
    StoreFast = 125,
    DeleteFast = 126,
    RaiseVarargs = 130,
    CallFunction = 131,
    MakeFunction = 132,
    BuildSlice = 133,
    MakeClosure = 134,
    LoadClosure = 135,
    LoadDeref = 136,
    StoreDeref = 137,
    DeleteDeref = 138,
    CallFunctionVar = 140,
    CallFunctionKw = 141,
    CallFunctionVarKw = 142,
    SetupWith = 143,
    ExtendedArg = 144,
    ListAppend = 145,
    SetAdd = 146,
    MapAdd = 147,
    LoadClassderef = 148,
}

/// How the 2-byte argument of an opcode is to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// The opcode takes no argument.
    None,
    /// Index into `co_consts`.
    Const,
    /// Index into `co_names`.
    Name,
    /// Index into `co_varnames`.
    Local,
    /// Index into `co_cellvars` followed by `co_freevars`.
    Free,
    /// Offset relative to the end of the instruction.
    JumpRel,
    /// Absolute instruction offset.
    JumpAbs,
    /// A raw integer (counts, flags, compare-op numbers).
    Int,
}

/// Operator-table membership used by the interpreter's dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpClass {
    Unary(UnaryOp),
    Binary(BinaryOp),
    Inplace(BinaryOp),
    Compare,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum UnaryOp {
    Positive,
    Negative,
    Not,
    Invert,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumString, IntoStaticStr, EnumIter,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum BinaryOp {
    Power,
    Multiply,
    Modulo,
    Add,
    Subtract,
    Subscr,
    FloorDivide,
    TrueDivide,
    Lshift,
    Rshift,
    And,
    Xor,
    Or,
}

impl BinaryOp {
    pub const COUNT: usize = BinaryOp::Or as usize + 1;

    /// Source-level operator symbol, used in error messages.
    pub const fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Power => "** or pow()",
            BinaryOp::Multiply => "*",
            BinaryOp::Modulo => "%",
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Subscr => "[]",
            BinaryOp::FloorDivide => "//",
            BinaryOp::TrueDivide => "/",
            BinaryOp::Lshift => "<<",
            BinaryOp::Rshift => ">>",
            BinaryOp::And => "&",
            BinaryOp::Xor => "^",
            BinaryOp::Or => "|",
        }
    }
}

/// `COMPARE_OP` argument values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, IntoStaticStr)]
#[repr(u8)]
pub enum CompareOp {
    #[strum(serialize = "<")]
    Lt = 0,
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    Ne,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Ge,
    #[strum(serialize = "in")]
    In,
    #[strum(serialize = "not in")]
    NotIn,
    #[strum(serialize = "is")]
    Is,
    #[strum(serialize = "is not")]
    IsNot,
    #[strum(serialize = "exception match")]
    ExceptionMatch,
    #[strum(serialize = "BAD")]
    Bad,
}

impl CompareOp {
    pub const COUNT: usize = CompareOp::Bad as usize + 1;

    pub fn symbol(self) -> &'static str {
        self.into()
    }
}

impl Opcode {
    /// Decode a raw byte; `None` for bytes that are not 3.4 opcodes.
    #[inline]
    pub fn from_u8(byte: u8) -> Option<Self> {
        Self::from_repr(byte)
    }

    /// The `dis` mnemonic, e.g. `"LOAD_CONST"`.
    #[inline]
    pub fn name(self) -> &'static str {
        self.into()
    }

    #[inline]
    pub const fn has_arg(self) -> bool {
        self as u8 >= HAVE_ARGUMENT
    }

    pub const fn arg_kind(self) -> ArgKind {
        use Opcode::*;
        if !self.has_arg() {
            return ArgKind::None;
        }
        match self {
            LoadConst => ArgKind::Const,
            StoreName | DeleteName | StoreAttr | DeleteAttr | StoreGlobal
            | DeleteGlobal | LoadName | LoadAttr | ImportName | ImportFrom
            | LoadGlobal => ArgKind::Name,
            ForIter | JumpForward | SetupLoop | SetupExcept | SetupFinally
            | SetupWith => ArgKind::JumpRel,
            JumpIfFalseOrPop | JumpIfTrueOrPop | JumpAbsolute
            | PopJumpIfFalse | PopJumpIfTrue | ContinueLoop => {
                ArgKind::JumpAbs
            }
            LoadFast | StoreFast | DeleteFast => ArgKind::Local,
            LoadClosure | LoadDeref | StoreDeref | DeleteDeref
            | LoadClassderef => ArgKind::Free,
            _ => ArgKind::Int,
        }
    }

    /// Operator-set membership, derived from the mnemonic prefix.
    pub fn class(self) -> OpClass {
        let name = self.name();
        if self == Opcode::CompareOp {
            return OpClass::Compare;
        }
        if let Some(op) =
            name.strip_prefix("UNARY_").and_then(|s| s.parse().ok())
        {
            return OpClass::Unary(op);
        }
        if let Some(op) =
            name.strip_prefix("BINARY_").and_then(|s| s.parse().ok())
        {
            return OpClass::Binary(op);
        }
        if let Some(op) =
            name.strip_prefix("INPLACE_").and_then(|s| s.parse().ok())
        {
            return OpClass::Inplace(op);
        }
        OpClass::Other
    }

    /// Whether control never falls through to the next instruction.
    pub const fn is_jump(self) -> bool {
        matches!(self.arg_kind(), ArgKind::JumpAbs | ArgKind::JumpRel)
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        Self::from_u8(byte).ok_or(byte)
    }
}
