use crate::error::IrError;
use crate::types::JvmType;
use std::fmt;
use std::sync::Arc;

#[derive(Debug)]
struct Node {
    ty: JvmType,
    next: Option<Arc<Node>>,
}

/// Operand stack of value categories.
///
/// Nodes are immutable and shared between copies, so cloning a `Stack` is O(1) no
/// matter how deep it is; pushing onto a copy never disturbs the original.
#[derive(Debug, Clone, Default)]
pub struct Stack {
    head: Option<Arc<Node>>,
    len: usize,
}

impl Stack {
    pub fn new() -> Self {
        Stack::default()
    }

    /// A stack holding exactly one `REFERENCE`, as seen on entry to a handler.
    pub fn caught_exception() -> Self {
        let mut stack = Stack::new();
        stack.push(JvmType::Reference);
        stack
    }

    pub fn push(&mut self, ty: JvmType) {
        let next = self.head.take();
        self.head = Some(Arc::new(Node { ty, next }));
        self.len += 1;
    }

    pub fn pop(&mut self) -> Result<JvmType, IrError> {
        match self.head.take() {
            Some(node) => {
                self.head = node.next.clone();
                self.len -= 1;
                Ok(node.ty)
            }
            None => fail!(StackUnderflow, "pop from an empty stack"),
        }
    }

    /// Pops the top entry, failing unless it is `ty`.
    pub fn pop_require(&mut self, ty: JvmType) -> Result<(), IrError> {
        let top = self.pop()?;
        if top != ty {
            fail!(TypeMismatch, "expected {} on top of stack, found {}", ty, top);
        }
        Ok(())
    }

    pub fn peek(&self) -> Option<JvmType> {
        self.head.as_ref().map(|n| n.ty)
    }

    pub fn clear(&mut self) {
        self.head = None;
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Entries from the top of the stack down.
    pub fn iter(&self) -> impl Iterator<Item = JvmType> + '_ {
        let mut node = self.head.as_deref();
        std::iter::from_fn(move || {
            let n = node?;
            node = n.next.as_deref();
            Some(n.ty)
        })
    }

    /// Whether two stacks share their whole node chain.
    pub fn ptr_eq(&self, other: &Stack) -> bool {
        match (&self.head, &other.head) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl PartialEq for Stack {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && (self.ptr_eq(other) || self.iter().eq(other.iter()))
    }
}

impl Eq for Stack {}

impl fmt::Display for Stack {
    // Bottom first, the way the stack is usually drawn.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries: Vec<JvmType> = self.iter().collect();
        write!(f, "[")?;
        for (i, ty) in entries.iter().rev().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", ty)?;
        }
        write!(f, "]")
    }
}
