//! Opcode implementations grouped by family.
//!
//! Every handler follows the same order: charge the fixed cost, check stack
//! depth and operand encoding without mutating anything, compute the result,
//! then settle memory and update the stacks. A failure at any step leaves the
//! stacks as they were.

mod control;
mod crypto;
mod introspection;
mod numeric;
mod splice;
mod stack;

use crate::opcodes::Opcode;
use crate::vm::Machine;
use crate::VmResult;

pub(crate) fn dispatch(m: &mut Machine<'_>, op: Opcode, data: &[u8]) -> VmResult<()> {
    use Opcode::*;
    match op {
        False | Data(_) | PushData1 | PushData2 | PushData4 => control::push_data(m, data),
        Num(n) => control::push_number(m, n),
        Nop => control::nop(m),
        Jump => control::jump(m, data),
        JumpIf => control::jump_if(m, data),
        Verify => control::verify(m),
        Fail => control::fail(m),

        ToAltStack => stack::to_alt_stack(m),
        FromAltStack => stack::from_alt_stack(m),
        Drop2 => stack::drop2(m),
        Dup2 => stack::dup_n(m, 2),
        Dup3 => stack::dup_n(m, 3),
        Over2 => stack::over2(m),
        Rot2 => stack::rot2(m),
        Swap2 => stack::swap2(m),
        IfDup => stack::if_dup(m),
        Depth => stack::depth(m),
        Drop => stack::drop(m),
        Dup => stack::dup_n(m, 1),
        Nip => stack::nip(m),
        Over => stack::over(m),
        Pick => stack::pick(m),
        Roll => stack::roll(m),
        Rot => stack::rot(m),
        Swap => stack::swap(m),
        Tuck => stack::tuck(m),

        Cat => splice::cat(m),
        Substr => splice::substr(m),
        Left => splice::left(m),
        Right => splice::right(m),
        Size => splice::size(m),
        CatPushData => splice::cat_push_data(m),
        Invert => splice::invert(m),
        And => splice::and(m),
        Or => splice::or(m),
        Xor => splice::xor(m),
        Equal => splice::equal(m),
        EqualVerify => splice::equal_verify(m),

        Add1 | Sub1 | Mul2 | Div2 | Not | ZeroNotEqual => numeric::unary(m, op),
        Add | Sub | Mul | Div | Mod | LShift | RShift | BoolAnd | BoolOr | NumEqual
        | NumEqualVerify | NumNotEqual | LessThan | GreaterThan | LessThanOrEqual
        | GreaterThanOrEqual | Min | Max => numeric::binary(m, op),
        Within => numeric::within(m),

        Sha256 => crypto::sha256(m),
        Sha3 => crypto::sha3(m),
        CheckSig => crypto::check_sig(m),
        CheckMultiSig => crypto::check_multi_sig(m),

        TxSigHash => introspection::tx_sig_hash(m),
        CheckOutput => introspection::check_output(m),
        Asset => introspection::asset(m),
        Amount => introspection::amount(m),
        Program => introspection::program(m),
        Index => introspection::index(m),
        EntryId => introspection::entry_id(m),
        OutputId => introspection::output_id(m),
        BlockHeight => introspection::block_height(m),
    }
}
