mod op;
mod instruction;
mod builder;
mod decoder;
mod line_table;

pub use op::{
    ArgKind, BinaryOp, CompareOp, HAVE_ARGUMENT, OpClass, Opcode, UnaryOp,
};
pub use instruction::Instruction;
pub use builder::{BytecodeBuilder, Label};
pub use decoder::{BytecodeDecoder, DecodeError};
pub use line_table::{LineTableBuilder, line_for_offset};

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    fn decode_all(bytes: &[u8]) -> Vec<Instruction> {
        BytecodeDecoder::new(bytes)
            .collect::<Result<_, _>>()
            .expect("well-formed bytecode")
    }

    fn ins(offset: usize, opcode: Opcode, arg: Option<u32>) -> Instruction {
        Instruction { offset, opcode, arg }
    }

    #[test]
    fn mnemonics() {
        assert_eq!(Opcode::LoadConst.name(), "LOAD_CONST");
        assert_eq!(Opcode::DupTopTwo.name(), "DUP_TOP_TWO");
        assert_eq!(Opcode::CallFunctionVarKw.name(), "CALL_FUNCTION_VAR_KW");
        assert_eq!(Opcode::JumpIfFalseOrPop.name(), "JUMP_IF_FALSE_OR_POP");
        assert_eq!(Opcode::LoadClassderef.name(), "LOAD_CLASSDEREF");
        assert_eq!(Opcode::InplaceTrueDivide.name(), "INPLACE_TRUE_DIVIDE");
    }

    #[test]
    fn numbering() {
        assert_eq!(Opcode::from_u8(1), Some(Opcode::PopTop));
        assert_eq!(Opcode::from_u8(23), Some(Opcode::BinaryAdd));
        assert_eq!(Opcode::from_u8(83), Some(Opcode::ReturnValue));
        assert_eq!(Opcode::from_u8(100), Some(Opcode::LoadConst));
        assert_eq!(Opcode::from_u8(144), Some(Opcode::ExtendedArg));
        assert_eq!(Opcode::from_u8(0), None);
        assert_eq!(Opcode::from_u8(99), None);
        assert_eq!(Opcode::try_from(255), Err(255));
        assert!(!Opcode::PopExcept.has_arg());
        assert!(Opcode::StoreName.has_arg());
    }

    #[test]
    fn arg_kinds() {
        assert_eq!(Opcode::LoadConst.arg_kind(), ArgKind::Const);
        assert_eq!(Opcode::LoadAttr.arg_kind(), ArgKind::Name);
        assert_eq!(Opcode::ImportFrom.arg_kind(), ArgKind::Name);
        assert_eq!(Opcode::ForIter.arg_kind(), ArgKind::JumpRel);
        assert_eq!(Opcode::SetupWith.arg_kind(), ArgKind::JumpRel);
        assert_eq!(Opcode::ContinueLoop.arg_kind(), ArgKind::JumpAbs);
        assert_eq!(Opcode::DeleteFast.arg_kind(), ArgKind::Local);
        assert_eq!(Opcode::LoadClassderef.arg_kind(), ArgKind::Free);
        assert_eq!(Opcode::CallFunction.arg_kind(), ArgKind::Int);
        assert_eq!(Opcode::BinaryAdd.arg_kind(), ArgKind::None);
    }

    #[test]
    fn operator_classes() {
        assert_eq!(Opcode::UnaryNot.class(), OpClass::Unary(UnaryOp::Not));
        assert_eq!(Opcode::BinaryAdd.class(), OpClass::Binary(BinaryOp::Add));
        assert_eq!(
            Opcode::BinarySubscr.class(),
            OpClass::Binary(BinaryOp::Subscr)
        );
        assert_eq!(
            Opcode::InplaceFloorDivide.class(),
            OpClass::Inplace(BinaryOp::FloorDivide)
        );
        assert_eq!(Opcode::CompareOp.class(), OpClass::Compare);
        assert_eq!(Opcode::StoreSubscr.class(), OpClass::Other);
        assert_eq!(Opcode::LoadConst.class(), OpClass::Other);

        // Every binary operator except subscript has an in-place twin.
        let inplace = Opcode::iter()
            .filter(|op| matches!(op.class(), OpClass::Inplace(_)))
            .count();
        assert_eq!(inplace, BinaryOp::COUNT - 1);
    }

    #[test]
    fn compare_ops() {
        assert_eq!(CompareOp::from_repr(0), Some(CompareOp::Lt));
        assert_eq!(CompareOp::from_repr(10), Some(CompareOp::ExceptionMatch));
        assert_eq!(CompareOp::from_repr(12), None);
        assert_eq!(CompareOp::NotIn.symbol(), "not in");
    }

    #[test]
    fn builder_and_decoder() {
        let mut b = BytecodeBuilder::new();
        b.load_const(0).load_const(1).op(Opcode::BinaryAdd);
        b.store_name(0).load_name(1).load_name(0);
        b.call_function(1, 0).pop_top().load_const(2).return_value();

        assert_eq!(decode_all(&b.into_bytes()), vec![
            ins(0, Opcode::LoadConst, Some(0)),
            ins(3, Opcode::LoadConst, Some(1)),
            ins(6, Opcode::BinaryAdd, None),
            ins(7, Opcode::StoreName, Some(0)),
            ins(10, Opcode::LoadName, Some(1)),
            ins(13, Opcode::LoadName, Some(0)),
            ins(16, Opcode::CallFunction, Some(1)),
            ins(19, Opcode::PopTop, None),
            ins(20, Opcode::LoadConst, Some(2)),
            ins(23, Opcode::ReturnValue, None),
        ]);
    }

    #[test]
    fn call_function_packs_keyword_count() {
        let mut b = BytecodeBuilder::new();
        b.call_function(2, 3);
        assert_eq!(b.as_bytes(), &[131, 2, 3]);
    }

    #[test]
    fn extended_arg() {
        let mut b = BytecodeBuilder::new();
        b.load_const(0x0001_0002);
        assert_eq!(b.as_bytes(), &[144, 1, 0, 100, 2, 0]);

        assert_eq!(decode_all(b.as_bytes()), vec![ins(
            3,
            Opcode::LoadConst,
            Some(0x0001_0002)
        )]);
    }

    #[test]
    fn forward_jumps() {
        let mut b = BytecodeBuilder::new();
        let rel = b.jump(Opcode::SetupLoop);
        let abs = b.jump(Opcode::PopJumpIfFalse);
        b.op(Opcode::BreakLoop);
        b.bind(abs);
        b.pop_block();
        b.bind(rel);
        b.return_value();

        let decoded = decode_all(&b.into_bytes());
        assert_eq!(decoded[0], ins(0, Opcode::SetupLoop, Some(5)));
        assert_eq!(decoded[0].jump_target(), Some(8));
        assert_eq!(decoded[1], ins(3, Opcode::PopJumpIfFalse, Some(7)));
        assert_eq!(decoded[1].jump_target(), Some(7));
    }

    #[test]
    fn backward_jump() {
        let mut b = BytecodeBuilder::new();
        b.op(Opcode::Nop);
        let head = b.current_offset();
        b.op(Opcode::Nop);
        b.jump_to(Opcode::JumpAbsolute, head);
        assert_eq!(decode_all(b.as_bytes())[2].jump_target(), Some(1));
    }

    #[test]
    fn decode_errors() {
        let mut dec = BytecodeDecoder::new(&[100, 1]);
        assert_eq!(dec.decode_next(), Err(DecodeError::Truncated { offset: 0 }));

        let mut dec = BytecodeDecoder::new(&[1, 0xFF]);
        assert!(matches!(dec.decode_next(), Ok(Some(_))));
        assert_eq!(
            dec.decode_next(),
            Err(DecodeError::UnknownOpcode { offset: 1, byte: 0xFF })
        );

        let mut dec = BytecodeDecoder::new(&[144, 1, 0, 1]);
        assert_eq!(
            dec.decode_next(),
            Err(DecodeError::DanglingExtendedArg { offset: 3 })
        );

        // The iterator stops after the first failure.
        let results: Vec<_> = BytecodeDecoder::new(&[0, 1, 1]).collect();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }

    #[test]
    fn display() {
        let jump = ins(10, Opcode::JumpForward, Some(4));
        let text = jump.to_string();
        assert!(text.trim_start().starts_with("10 JUMP_FORWARD"));
        assert!(text.ends_with(" 4 (to 17)"));

        let pop = ins(0, Opcode::PopTop, None);
        assert_eq!(pop.to_string().trim(), "0 POP_TOP");
    }
}
