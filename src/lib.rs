//! # JVM IR
//!
//! Two intermediate representations for JVM method bodies and the lowerings between them.
//!
//! The stack IR (`stack`) is a sequence of operand-stack instructions close to the
//! bytecode. The ref IR (`ir`) is three-address code: statements whose operands are
//! expression trees over locals, with no operand stack. `convert::to_ref` turns the
//! former into the latter using a stack-type analysis; `convert::to_stack` goes back,
//! guided by a control-flow graph of the statements.
//!
//! # Examples
//!
//! ```
//!  use jvm_ir::convert::{to_ref, to_stack};
//!  use jvm_ir::ops::{BinOp, Constant};
//!  use jvm_ir::stack::{StackBody, StackOp};
//!  use jvm_ir::types::JvmType;
//!
//!  let mut body = StackBody::new();
//!  let x = body.new_local(Some("x"));
//!  body.push(StackOp::Const(Constant::Int(2)));
//!  body.push(StackOp::Const(Constant::Int(3)));
//!  body.push(StackOp::Binary { op: BinOp::Add, ty: JvmType::Int });
//!  body.push(StackOp::Store { ty: JvmType::Int, local: x });
//!  body.push(StackOp::Load { ty: JvmType::Int, local: x });
//!  body.push(StackOp::Return(Some(JvmType::Int)));
//!
//!  let ref_body = to_ref::convert(&body).unwrap();
//!  assert_eq!(ref_body.len(), 2);
//!  let back = to_stack::convert(&ref_body).unwrap();
//!  assert_eq!(back.len(), 6);
//! ```

#[macro_use]
pub mod error;
pub mod convert;
pub mod ir;
pub mod ops;
pub mod stack;
mod tests;
pub mod types;

pub use error::{ErrorKind, IrError};
