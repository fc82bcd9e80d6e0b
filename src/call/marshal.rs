//! Outbound argument marshalling and post-call write-back.
//!
//! Every argument is validated and converted into its native
//! representation before the call dispatches; a failure here means the
//! native function is never entered and no argument is partially
//! applied. Storage whose address crosses the boundary — encoded string
//! buffers, Out/InOut cells — lives in the [`CallFrame`] for exactly the
//! duration of the call.

use crate::error::{FfiError, FfiResult};
use crate::types::{CType, PrimKind};
use crate::value::{encode_text, scalar_bits, scalar_value, FfiValue};

use super::site::{CallSite, Direction};

/// Native representation of one argument, with stable storage.
pub(crate) enum AbiArg {
    Bits8(u8),
    Bits16(u16),
    Bits32(u32),
    Bits64(u64),
    F32(f32),
    F64(f64),
    /// A pointer-width machine word (addresses, handles, decayed
    /// arrays).
    Word(usize),
    /// Address of by-value struct data; the callee receives the bytes,
    /// not the address.
    StructData(usize),
}

/// An Out/InOut write-back cell. The box pins the cell's address for the
/// duration of the call; the callee writes through it.
pub(crate) struct OutCell {
    pub index: usize,
    pub kind: PrimKind,
    pub cell: Box<u64>,
}

/// Everything whose lifetime is scoped to one native call.
pub(crate) struct CallFrame {
    pub abi: Vec<AbiArg>,
    pub out_cells: Vec<OutCell>,
    /// Encoded text buffers; dropped when the call returns unless the
    /// caller retained the string explicitly beforehand.
    #[allow(dead_code)]
    pub text_buffers: Vec<Vec<u8>>,
}

/// Validate and convert all arguments. Runs to completion or fails
/// without side effects on `args`.
pub(crate) fn marshal_args(site: &CallSite, args: &[FfiValue]) -> FfiResult<CallFrame> {
    let params = site.params();
    if args.len() != params.len() {
        return Err(FfiError::marshal(
            format!("{} arguments", params.len()),
            format!("{} arguments", args.len()),
            None,
        ));
    }

    let mut frame = CallFrame {
        abi: Vec::with_capacity(args.len()),
        out_cells: Vec::new(),
        text_buffers: Vec::new(),
    };

    for (i, (param, arg)) in params.iter().zip(args.iter()).enumerate() {
        match param.direction {
            Direction::In => {
                let abi = marshal_in(&param.ty, arg, i, &mut frame)?;
                frame.abi.push(abi);
            }
            Direction::Out | Direction::InOut => {
                let kind = match param.ty.as_ref() {
                    CType::Prim(kind) => *kind,
                    // Site construction already rejected everything else.
                    _ => unreachable!("non-primitive out parameter"),
                };
                let seed = if param.direction == Direction::InOut {
                    scalar_bits(kind, arg).map_err(|e| with_index(e, i))?
                } else {
                    0
                };
                let cell = Box::new(seed);
                let addr = cell.as_ref() as *const u64 as usize;
                frame.out_cells.push(OutCell {
                    index: i,
                    kind,
                    cell,
                });
                frame.abi.push(AbiArg::Word(addr));
            }
        }
    }

    Ok(frame)
}

fn marshal_in(
    ty: &CType,
    arg: &FfiValue,
    index: usize,
    frame: &mut CallFrame,
) -> FfiResult<AbiArg> {
    let mismatch = || FfiError::marshal(ty.to_string(), arg.to_string(), Some(index));

    match ty {
        CType::Prim(kind) => {
            let bits = scalar_bits(*kind, arg).map_err(|e| with_index(e, index))?;
            Ok(match kind {
                PrimKind::Bool | PrimKind::I8 | PrimKind::U8 => AbiArg::Bits8(bits as u8),
                PrimKind::I16 | PrimKind::U16 => AbiArg::Bits16(bits as u16),
                PrimKind::I32 | PrimKind::U32 => AbiArg::Bits32(bits as u32),
                PrimKind::I64 | PrimKind::U64 => AbiArg::Bits64(bits),
                PrimKind::F32 => AbiArg::F32(f32::from_bits(bits as u32)),
                PrimKind::F64 => AbiArg::F64(f64::from_bits(bits)),
            })
        }
        CType::Text(encoding) => match arg {
            FfiValue::Str(s) => {
                let buf = encode_text(s, *encoding).map_err(|e| with_index(e, index))?;
                let addr = buf.as_ptr() as usize;
                frame.text_buffers.push(buf);
                Ok(AbiArg::Word(addr))
            }
            FfiValue::Null => Ok(AbiArg::Word(0)),
            // Already-native text: a retained buffer or a raw pointer.
            FfiValue::Ptr(_) | FfiValue::Owned(_) => Ok(AbiArg::Word(arg.addr().unwrap())),
            _ => Err(mismatch()),
        },
        CType::Pointer(_) | CType::Opaque | CType::Array(_) | CType::Callback { .. } => {
            match arg {
                FfiValue::Null => Ok(AbiArg::Word(0)),
                FfiValue::Ptr(_) | FfiValue::Owned(_) => Ok(AbiArg::Word(arg.addr().unwrap())),
                _ => Err(mismatch()),
            }
        }
        // By-value composite: pass the already-laid-out address; the
        // dispatch layer hands libffi the data pointer, no copy here.
        CType::Struct { .. } => match arg {
            FfiValue::Ptr(_) | FfiValue::Owned(_) => {
                Ok(AbiArg::StructData(arg.addr().unwrap()))
            }
            _ => Err(mismatch()),
        },
        CType::Union { .. } | CType::Void => unreachable!("rejected at site construction"),
    }
}

/// Copy callee-written Out/InOut results back into the caller-visible
/// bindings.
pub(crate) fn write_back(frame: &CallFrame, args: &mut [FfiValue]) {
    for out in &frame.out_cells {
        args[out.index] = scalar_value(out.kind, *out.cell);
    }
}

fn with_index(err: FfiError, index: usize) -> FfiError {
    match err {
        FfiError::MarshalTypeError { expected, got, .. } => FfiError::MarshalTypeError {
            expected,
            got,
            index: Some(index),
        },
        other => other,
    }
}
