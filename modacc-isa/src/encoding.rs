//! # Instruction Bit Packing
//!
//! Field positions, masks and pure pack/extract helpers for the two word
//! widths the accelerator consumes.
//!
//! ## Chip words (64-bit, executed by one chip's PE controller)
//!
//! ```text
//! Load:      [01][address:18][length:18][dest_pe:6][dest_reg:4][repeat:10][change:1][gate:5]
//! Control:   [10][state:8][cal:1][next:8][address:18][gate:5][0:22]
//! Interrupt: [11][ddr_address:32][length-1:13][0:17]
//! Nop:       all zero
//! ```
//!
//! ## Global words (128-bit, executed by the board sequencer)
//!
//! ```text
//! Transfer (L1): [000][chips:16][ddr_address:32][length-1:32][type:3][data_address:32][check:1][0:9]
//! Repeat:        [001][chips:16][times-1:16][0:93]
//! RegAccess:     [110][chips:16][type:3][data_address:32][data:32][0:42]
//! Done:          [111][0:125]
//! ```
//!
//! Every packer masks its inputs to the field width. Oversized values wrap
//! the way the device registers do; they are never rejected here.

// ============================================================================
// Chip Word Tags
// ============================================================================

/// Tag field of a chip word: bits 62-63
pub const CHIP_TAG_SHIFT: u32 = 62;

/// Tag mask (2 bits)
pub const CHIP_TAG_MASK: u64 = 0b11;

pub const TAG_NOP: u64 = 0b00;
pub const TAG_LOAD: u64 = 0b01;
pub const TAG_CONTROL: u64 = 0b10;
pub const TAG_INTERRUPT: u64 = 0b11;

// ============================================================================
// Chip Word Fields
// ============================================================================

/// Load SRAM address: bits 44-61 (18 bits)
pub const LOAD_ADDRESS_SHIFT: u32 = 44;

/// Load length in SRAM units: bits 26-43 (18 bits)
pub const LOAD_LENGTH_SHIFT: u32 = 26;

/// Load destination PE code: bits 20-25 (6 bits)
pub const LOAD_DEST_PE_SHIFT: u32 = 20;

/// Load destination register: bits 16-19 (4 bits)
pub const LOAD_DEST_REG_SHIFT: u32 = 16;

/// Load repeat count: bits 6-15 (10 bits)
pub const LOAD_REPEAT_SHIFT: u32 = 6;

/// Load change-PE flag: bit 5
pub const LOAD_CHANGE_SHIFT: u32 = 5;

/// Load PE gate: bits 0-4 (5 bits)
pub const LOAD_GATE_SHIFT: u32 = 0;

/// Control current state: bits 54-61 (8 bits)
pub const CONTROL_STATE_SHIFT: u32 = 54;

/// Control calculate flag: bit 53
pub const CONTROL_CAL_SHIFT: u32 = 53;

/// Control next state: bits 45-52 (8 bits)
pub const CONTROL_NEXT_SHIFT: u32 = 45;

/// Control address: bits 27-44 (18 bits)
pub const CONTROL_ADDRESS_SHIFT: u32 = 27;

/// Control PE gate: bits 22-26 (5 bits)
pub const CONTROL_GATE_SHIFT: u32 = 22;

/// Interrupt DDR address: bits 30-61 (32 bits)
pub const INTERRUPT_ADDRESS_SHIFT: u32 = 30;

/// Interrupt length minus one: bits 17-29 (13 bits)
pub const INTERRUPT_LENGTH_SHIFT: u32 = 17;

pub const SRAM_FIELD_MASK: u64 = 0x3_FFFF;
pub const DEST_PE_MASK: u64 = 0x3F;
pub const DEST_REG_MASK: u64 = 0xF;
pub const REPEAT_MASK: u64 = 0x3FF;
pub const GATE_MASK: u64 = 0x1F;
pub const STATE_MASK: u64 = 0xFF;
pub const FLAG_MASK: u64 = 0x1;
pub const DDR_FIELD_MASK: u64 = 0xFFFF_FFFF;
pub const INTERRUPT_LENGTH_MASK: u64 = 0x1FFF;

// ============================================================================
// Global Word Tags and Fields
// ============================================================================

/// Tag field of a global word: bits 125-127
pub const GLOBAL_TAG_SHIFT: u32 = 125;

/// Tag mask (3 bits)
pub const GLOBAL_TAG_MASK: u128 = 0b111;

pub const TAG_TRANSFER: u128 = 0b000;
pub const TAG_REPEAT: u128 = 0b001;
pub const TAG_REGISTER: u128 = 0b110;
pub const TAG_DONE: u128 = 0b111;

/// Chip mask: bits 109-124 (16 bits)
pub const CHIP_MASK_SHIFT: u32 = 109;

pub const TRANSFER_DDR_SHIFT: u32 = 77;
pub const TRANSFER_LENGTH_SHIFT: u32 = 45;
pub const TRANSFER_TYPE_SHIFT: u32 = 42;
pub const TRANSFER_DATA_ADDRESS_SHIFT: u32 = 10;
pub const TRANSFER_CHECK_SHIFT: u32 = 9;

pub const REPEAT_TIMES_SHIFT: u32 = 93;

pub const REGISTER_TYPE_SHIFT: u32 = 106;
pub const REGISTER_ADDRESS_SHIFT: u32 = 74;
pub const REGISTER_DATA_SHIFT: u32 = 42;

pub const CHIP_MASK_MASK: u128 = 0xFFFF;
pub const WIDE_FIELD_MASK: u128 = 0xFFFF_FFFF;
pub const DATA_TYPE_MASK: u128 = 0b111;
pub const REPEAT_TIMES_MASK: u128 = 0xFFFF;

// ============================================================================
// Field Extraction Functions
// ============================================================================

/// Extract a field from a chip word
#[inline]
pub const fn field64(word: u64, shift: u32, mask: u64) -> u64 {
    (word >> shift) & mask
}

/// Extract a field from a global word
#[inline]
pub const fn field128(word: u128, shift: u32, mask: u128) -> u128 {
    (word >> shift) & mask
}

/// Extract the 2-bit tag of a chip word
#[inline]
pub const fn chip_tag(word: u64) -> u64 {
    field64(word, CHIP_TAG_SHIFT, CHIP_TAG_MASK)
}

/// Extract the 3-bit tag of a global word
#[inline]
pub const fn global_tag(word: u128) -> u128 {
    field128(word, GLOBAL_TAG_SHIFT, GLOBAL_TAG_MASK)
}

// ============================================================================
// Chip Word Packing
// ============================================================================

/// Pack a Load word
#[inline]
#[allow(clippy::too_many_arguments)]
pub const fn pack_load(
    address: u32,
    length: u32,
    dest_pe: u8,
    dest_reg: u8,
    repeat: u16,
    change: bool,
    pe_gate: u8,
) -> u64 {
    (TAG_LOAD << CHIP_TAG_SHIFT)
        | ((address as u64 & SRAM_FIELD_MASK) << LOAD_ADDRESS_SHIFT)
        | ((length as u64 & SRAM_FIELD_MASK) << LOAD_LENGTH_SHIFT)
        | ((dest_pe as u64 & DEST_PE_MASK) << LOAD_DEST_PE_SHIFT)
        | ((dest_reg as u64 & DEST_REG_MASK) << LOAD_DEST_REG_SHIFT)
        | ((repeat as u64 & REPEAT_MASK) << LOAD_REPEAT_SHIFT)
        | ((change as u64) << LOAD_CHANGE_SHIFT)
        | ((pe_gate as u64 & GATE_MASK) << LOAD_GATE_SHIFT)
}

/// Pack a Control word
#[inline]
pub const fn pack_control(state: u8, cal: bool, next: u8, address: u32, pe_gate: u8) -> u64 {
    (TAG_CONTROL << CHIP_TAG_SHIFT)
        | ((state as u64 & STATE_MASK) << CONTROL_STATE_SHIFT)
        | ((cal as u64) << CONTROL_CAL_SHIFT)
        | ((next as u64 & STATE_MASK) << CONTROL_NEXT_SHIFT)
        | ((address as u64 & SRAM_FIELD_MASK) << CONTROL_ADDRESS_SHIFT)
        | ((pe_gate as u64 & GATE_MASK) << CONTROL_GATE_SHIFT)
}

/// Pack an Interrupt word. `length` is in bytes and stored as `length - 1`.
#[inline]
pub const fn pack_interrupt(ddr_address: u32, length: u32) -> u64 {
    (TAG_INTERRUPT << CHIP_TAG_SHIFT)
        | ((ddr_address as u64 & DDR_FIELD_MASK) << INTERRUPT_ADDRESS_SHIFT)
        | ((length.wrapping_sub(1) as u64 & INTERRUPT_LENGTH_MASK) << INTERRUPT_LENGTH_SHIFT)
}

// ============================================================================
// Global Word Packing
// ============================================================================

/// Pack an L1 bulk transfer word. A zero length is sent as a one-byte transfer.
#[inline]
pub const fn pack_transfer(
    chip_mask: u16,
    ddr_address: u32,
    length: u64,
    data_type: u8,
    data_address: u32,
    check: bool,
) -> u128 {
    let length = if length == 0 { 1 } else { length };
    (TAG_TRANSFER << GLOBAL_TAG_SHIFT)
        | ((chip_mask as u128) << CHIP_MASK_SHIFT)
        | ((ddr_address as u128) << TRANSFER_DDR_SHIFT)
        | ((((length - 1) as u128) & WIDE_FIELD_MASK) << TRANSFER_LENGTH_SHIFT)
        | ((data_type as u128 & DATA_TYPE_MASK) << TRANSFER_TYPE_SHIFT)
        | ((data_address as u128) << TRANSFER_DATA_ADDRESS_SHIFT)
        | ((check as u128) << TRANSFER_CHECK_SHIFT)
}

/// Pack a Repeat word. `times` is stored as `times - 1`.
#[inline]
pub const fn pack_repeat(chip_mask: u16, times: u32) -> u128 {
    (TAG_REPEAT << GLOBAL_TAG_SHIFT)
        | ((chip_mask as u128) << CHIP_MASK_SHIFT)
        | ((times.wrapping_sub(1) as u128 & REPEAT_TIMES_MASK) << REPEAT_TIMES_SHIFT)
}

/// Pack a RegisterAccess word
#[inline]
pub const fn pack_register(chip_mask: u16, data_type: u8, data_address: u32, data: u32) -> u128 {
    (TAG_REGISTER << GLOBAL_TAG_SHIFT)
        | ((chip_mask as u128) << CHIP_MASK_SHIFT)
        | ((data_type as u128 & DATA_TYPE_MASK) << REGISTER_TYPE_SHIFT)
        | ((data_address as u128) << REGISTER_ADDRESS_SHIFT)
        | ((data as u128) << REGISTER_DATA_SHIFT)
}

/// Pack the end-of-stream marker
#[inline]
pub const fn pack_done() -> u128 {
    TAG_DONE << GLOBAL_TAG_SHIFT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_field_layout() {
        let word = pack_load(0x12, 4, 0b101111, 8, 1, false, 16);
        assert_eq!(chip_tag(word), TAG_LOAD);
        assert_eq!(field64(word, LOAD_ADDRESS_SHIFT, SRAM_FIELD_MASK), 0x12);
        assert_eq!(field64(word, LOAD_LENGTH_SHIFT, SRAM_FIELD_MASK), 4);
        assert_eq!(field64(word, LOAD_DEST_PE_SHIFT, DEST_PE_MASK), 0b101111);
        assert_eq!(field64(word, LOAD_DEST_REG_SHIFT, DEST_REG_MASK), 8);
        assert_eq!(field64(word, LOAD_REPEAT_SHIFT, REPEAT_MASK), 1);
        assert_eq!(field64(word, LOAD_CHANGE_SHIFT, FLAG_MASK), 0);
        assert_eq!(field64(word, LOAD_GATE_SHIFT, GATE_MASK), 16);
    }

    #[test]
    fn test_control_known_word() {
        // IDLE -> LOAD_PARA with the fixed control address and 16 PEs gated
        let word = pack_control(0, true, 1, 0x3FFFF, 16);
        let expected = (0b10u64 << 62)
            | (1u64 << 53)
            | (1u64 << 45)
            | (0x3FFFFu64 << 27)
            | (16u64 << 22);
        assert_eq!(word, expected);
    }

    #[test]
    fn test_interrupt_stores_length_minus_one() {
        let word = pack_interrupt(0x1000, 4096);
        assert_eq!(chip_tag(word), TAG_INTERRUPT);
        assert_eq!(field64(word, INTERRUPT_ADDRESS_SHIFT, DDR_FIELD_MASK), 0x1000);
        assert_eq!(field64(word, INTERRUPT_LENGTH_SHIFT, INTERRUPT_LENGTH_MASK), 4095);
    }

    #[test]
    fn test_interrupt_zero_length_wraps() {
        let word = pack_interrupt(0, 0);
        assert_eq!(field64(word, INTERRUPT_LENGTH_SHIFT, INTERRUPT_LENGTH_MASK), 0x1FFF);
    }

    #[test]
    fn test_oversized_fields_are_masked() {
        let word = pack_load(0x4_0001, 0, 0xFF, 0x1F, 0x7FF, true, 0x3F);
        assert_eq!(field64(word, LOAD_ADDRESS_SHIFT, SRAM_FIELD_MASK), 1);
        assert_eq!(field64(word, LOAD_DEST_PE_SHIFT, DEST_PE_MASK), 0x3F);
        assert_eq!(field64(word, LOAD_DEST_REG_SHIFT, DEST_REG_MASK), 0xF);
        assert_eq!(field64(word, LOAD_REPEAT_SHIFT, REPEAT_MASK), 0x3FF);
        assert_eq!(field64(word, LOAD_GATE_SHIFT, GATE_MASK), 0x1F);
        assert_eq!(chip_tag(word), TAG_LOAD);
    }

    #[test]
    fn test_transfer_zero_length_is_one_byte() {
        assert_eq!(pack_transfer(1, 0, 0, 0, 0, false), pack_transfer(1, 0, 1, 0, 0, false));
        assert_eq!(field128(pack_transfer(1, 0, 1, 0, 0, false), TRANSFER_LENGTH_SHIFT, WIDE_FIELD_MASK), 0);
    }

    #[test]
    fn test_global_tags() {
        assert_eq!(global_tag(pack_transfer(0xFFFF, 0, 32, 0, 0, false)), TAG_TRANSFER);
        assert_eq!(global_tag(pack_repeat(0x8000, 3)), TAG_REPEAT);
        assert_eq!(global_tag(pack_register(0x8000, 4, 0x68, 0)), TAG_REGISTER);
        assert_eq!(global_tag(pack_done()), TAG_DONE);
    }

    #[test]
    fn test_register_fields() {
        let word = pack_register(0xA5A5, 2, 0xDEAD_BEEF, 0x1234_5678);
        assert_eq!(field128(word, CHIP_MASK_SHIFT, CHIP_MASK_MASK), 0xA5A5);
        assert_eq!(field128(word, REGISTER_TYPE_SHIFT, DATA_TYPE_MASK), 2);
        assert_eq!(field128(word, REGISTER_ADDRESS_SHIFT, WIDE_FIELD_MASK), 0xDEAD_BEEF);
        assert_eq!(field128(word, REGISTER_DATA_SHIFT, WIDE_FIELD_MASK), 0x1234_5678);
        assert_eq!(word & ((1u128 << 42) - 1), 0);
    }

    #[test]
    fn test_repeat_times_minus_one() {
        let word = pack_repeat(0xFFFF, 1);
        assert_eq!(field128(word, REPEAT_TIMES_SHIFT, REPEAT_TIMES_MASK), 0);
        let word = pack_repeat(0xFFFF, 0);
        assert_eq!(field128(word, REPEAT_TIMES_SHIFT, REPEAT_TIMES_MASK), 0xFFFF);
    }
}
