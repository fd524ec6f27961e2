use std::fmt;

macro_rules! err {
    ($kind:ident, $msg:literal) => {
        $crate::error::IrError::new($crate::error::ErrorKind::$kind, $msg)
    };
    ($kind:ident, $fmtstr:literal, $($args:tt)*) => {
        $crate::error::IrError::new($crate::error::ErrorKind::$kind, format!($fmtstr, $($args)*))
    };
}

macro_rules! fail {
    ($kind:ident, $msg:literal) => {
        return Err(err!($kind, $msg))
    };
    ($kind:ident, $fmtstr:literal, $($args:tt)*) => {
        return Err(err!($kind, $fmtstr, $($args)*))
    };
}

/// Broad category of a failed conversion.
///
/// All of these reject the whole body; there is no partial output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind
{
    /// An instruction popped more values than the operand stack holds.
    StackUnderflow,
    /// An operand did not have the category the instruction declares.
    TypeMismatch,
    /// A branch target, try/catch boundary or local range names code that is not in the body.
    UnresolvedTarget,
    /// A pending cell or label was never bound.
    UnresolvedCell,
    /// Two predecessors reach a join with stack states that cannot share locals.
    IncompatibleJoin,
    /// Any other structurally invalid body.
    Malformed,
}

impl fmt::Display for ErrorKind
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let s = match self
        {
            ErrorKind::StackUnderflow => "stack underflow",
            ErrorKind::TypeMismatch => "type mismatch",
            ErrorKind::UnresolvedTarget => "unresolved target",
            ErrorKind::UnresolvedCell => "unresolved cell",
            ErrorKind::IncompatibleJoin => "incompatible join",
            ErrorKind::Malformed => "malformed body",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrError
{
    kind: ErrorKind,
    msg: String,
    contexts: Vec<String>,
}

impl IrError
{
    pub(crate) fn new(kind: ErrorKind, msg: impl Into<String>) -> Self
    {
        IrError {
            kind,
            msg: msg.into(),
            contexts: Vec::new(),
        }
    }

    pub(crate) fn with_context(base: IrError, context: String) -> Self
    {
        let mut contexts = base.contexts;
        contexts.push(context);
        IrError { kind: base.kind, msg: base.msg, contexts }
    }

    pub fn kind(&self) -> ErrorKind
    {
        self.kind
    }

    pub fn message(&self) -> &str
    {
        &self.msg
    }
}

/// Adds a context line to the error of a failed result.
pub(crate) trait ResultExt<T>
{
    fn context<F: FnOnce() -> String>(self, f: F) -> Result<T, IrError>;
}

impl<T> ResultExt<T> for Result<T, IrError>
{
    fn context<F: FnOnce() -> String>(self, f: F) -> Result<T, IrError>
    {
        self.map_err(|e| IrError::with_context(e, f()))
    }
}

impl fmt::Display for IrError
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}: {}", self.kind, self.msg)?;
        let mut connector = " for ";
        for context in &self.contexts
        {
            write!(f, "{}{}", connector, context)?;
            connector = " of ";
        }
        Ok(())
    }
}

impl std::error::Error for IrError {}
