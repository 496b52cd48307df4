/*
* io_uring carries a 64-bit user_data value per submission. We use it to identify
* what kind of event completed:
*
* 1. Which connection the event is for: an index into the connection slab.
*    Accept and Tick completions carry no connection and use index 0.
*
* 2. Which operation: Accept, Recv, Send or Tick.
*
* 3. Which side: client-facing or worker-facing channel.
*/

use crate::core::operation::{OpCode, Operation, Side};

const OPCODE_BITS: u64 = 7;
const SIDE_BITS: u64 = 1;
const ID_BITS: u64 = 64 - (OPCODE_BITS + SIDE_BITS);

const OPCODE_MASK: u64 = (1 << OPCODE_BITS) - 1; // 0x7F
const SIDE_MASK: u64 = (1 << SIDE_BITS) - 1; // 0x01
const ID_MASK: u64 = (1 << ID_BITS) - 1; // 0x00FF_FFFF_FFFF_FFFF

const OPCODE_SHIFT: u64 = 0;
const SIDE_SHIFT: u64 = OPCODE_SHIFT + OPCODE_BITS; // 7
const ID_SHIFT: u64 = SIDE_SHIFT + SIDE_BITS; // 8

#[inline]
pub fn pack_user_data(conn_id: usize, op: Operation) -> u64 {
    let (opcode, side) = match op {
        Operation::Accept(side) => (OpCode::Accept, side),
        Operation::Recv(side) => (OpCode::Recv, side),
        Operation::Send(side) => (OpCode::Send, side),
        Operation::Tick => (OpCode::Tick, Side::Client),
    };

    let id = conn_id as u64;
    debug_assert!((id & !ID_MASK) == 0, "conn_id exceeds 56 bits");

    ((id & ID_MASK) << ID_SHIFT)
        | (((side as u64) & SIDE_MASK) << SIDE_SHIFT)
        | ((opcode as u64) & OPCODE_MASK)
}

/// Returns `None` for a tag this module never produced.
#[inline]
pub fn unpack_user_data(tag: u64) -> Option<(usize, Operation)> {
    let id = ((tag >> ID_SHIFT) & ID_MASK) as usize;
    let side = Side::from_bit(((tag >> SIDE_SHIFT) & SIDE_MASK) as u8);
    let opc = ((tag >> OPCODE_SHIFT) & OPCODE_MASK) as u8;

    let op = match OpCode::try_from_u8(opc)? {
        OpCode::Accept => Operation::Accept(side),
        OpCode::Recv => Operation::Recv(side),
        OpCode::Send => Operation::Send(side),
        OpCode::Tick => Operation::Tick,
    };

    Some((id, op))
}
