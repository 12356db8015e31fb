//! Machine-word encoding patterns for basic instructions.
//!
//! Every basic instruction declares its encoding as a 32-character pattern of
//! `0`/`1` literal bits and placeholder letters, written with spaces between
//! fields for readability:
//!
//! ```text
//! 000000 sssss ttttt fffff 00000 100000
//! ```
//!
//! The letters map to operand positions: `f` is the instruction's first
//! operand, `s` the second, and `t` the third. The literal bits form the
//! (mask, template) pair used to match a binary word back to its instruction,
//! and the placeholder fields drive both encoding (operand values into a
//! machine word) and decoding (machine word back into operand values).

/// One contiguous run of a placeholder letter within a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Segment {
    /// Shift of the segment's least significant bit within the word.
    shift: u32,
    /// Number of bits in the segment.
    width: u32,
}

/// All the bits belonging to one operand, most significant segment first.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Field {
    operand_index: usize,
    segments: Vec<Segment>,
}

impl Field {
    fn total_width(&self) -> u32 {
        self.segments.iter().map(|s| s.width).sum()
    }
}

/// A parsed encoding pattern: the fixed-bit mask/template pair plus the
/// operand fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoding {
    /// Bits that are fixed (`0` or `1`) in the pattern.
    pub mask: u32,
    /// The values of the fixed bits.
    pub template: u32,
    fields: Vec<Field>,
}

impl Encoding {
    /// Parses a pattern string.
    ///
    /// # Panics
    ///
    /// Panics if the pattern does not contain exactly 32 significant
    /// characters or contains a character other than `0`, `1`, `f`, `s`, `t`,
    /// or a space. A malformed pattern is a bug in the instruction table, not
    /// a user error.
    pub fn parse(pattern: &str) -> Self {
        let bits: Vec<char> = pattern.chars().filter(|c| !c.is_whitespace()).collect();
        assert_eq!(bits.len(), 32, "encoding pattern {pattern:?} must have 32 bits");

        let mut mask: u32 = 0;
        let mut template: u32 = 0;
        let mut fields: Vec<Field> = Vec::new();

        let mut position = 0;
        while position < 32 {
            let c = bits[position];
            let shift_of = |pos: usize| 31 - pos as u32;
            match c {
                '0' | '1' => {
                    mask |= 1 << shift_of(position);
                    if c == '1' {
                        template |= 1 << shift_of(position);
                    }
                    position += 1;
                }
                'f' | 's' | 't' => {
                    let start = position;
                    while position < 32 && bits[position] == c {
                        position += 1;
                    }
                    let width = (position - start) as u32;
                    let segment = Segment { shift: shift_of(position - 1), width };
                    let operand_index = match c {
                        'f' => 0,
                        's' => 1,
                        't' => 2,
                        _ => unreachable!(),
                    };
                    match fields.iter_mut().find(|f| f.operand_index == operand_index) {
                        Some(field) => field.segments.push(segment),
                        None => fields.push(Field { operand_index, segments: vec![segment] }),
                    }
                }
                other => panic!("invalid character {other:?} in encoding pattern {pattern:?}"),
            }
        }

        Self { mask, template, fields }
    }

    /// Number of operands the pattern references.
    pub fn operand_count(&self) -> usize {
        self.fields.iter().map(|f| f.operand_index + 1).max().unwrap_or(0)
    }

    /// Total bit width of the field for the given operand, or 0 if the
    /// operand has no field (its value is implied by fixed bits).
    pub fn field_width(&self, operand_index: usize) -> u32 {
        self.fields
            .iter()
            .find(|f| f.operand_index == operand_index)
            .map(Field::total_width)
            .unwrap_or(0)
    }

    /// Whether a machine word matches this pattern's fixed bits.
    pub fn matches(&self, word: u32) -> bool {
        word & self.mask == self.template
    }

    /// Builds the machine word from resolved operand values. Operand values
    /// are truncated to their field widths.
    pub fn encode(&self, operands: &[i32]) -> u32 {
        let mut word = self.template;
        for field in &self.fields {
            let mut value = *operands.get(field.operand_index).unwrap_or(&0) as u32;
            // Segments were collected most significant first; fill from the
            // least significant segment upward.
            for segment in field.segments.iter().rev() {
                let field_mask = if segment.width == 32 { u32::MAX } else { (1 << segment.width) - 1 };
                word |= (value & field_mask) << segment.shift;
                value = value.checked_shr(segment.width).unwrap_or(0);
            }
        }
        word
    }

    /// Extracts the raw (zero-extended) operand values from a machine word.
    /// The result is indexed by operand position.
    pub fn decode_raw(&self, word: u32) -> Vec<i32> {
        let mut operands = vec![0i32; self.operand_count()];
        for field in &self.fields {
            let mut value: u32 = 0;
            for segment in &field.segments {
                let field_mask = if segment.width == 32 { u32::MAX } else { (1 << segment.width) - 1 };
                value = (value << segment.width) | ((word >> segment.shift) & field_mask);
            }
            operands[field.operand_index] = value as i32;
        }
        operands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_r_format() {
        // add $t1,$t2,$t3
        let enc = Encoding::parse("000000 sssss ttttt fffff 00000 100000");
        assert_eq!(enc.operand_count(), 3);
        assert_eq!(enc.field_width(0), 5);

        // add $9,$10,$11
        let word = enc.encode(&[9, 10, 11]);
        assert_eq!(word, 0x014b_4820);
        assert!(enc.matches(word));
        assert_eq!(enc.decode_raw(word), vec![9, 10, 11]);
    }

    #[test]
    fn test_i_format_truncates() {
        // addi $t1,$t2,-100
        let enc = Encoding::parse("001000 sssss fffff tttttttttttttttt");
        let word = enc.encode(&[9, 10, -100]);
        assert_eq!(word & 0xffff, 0xff9c);
        assert_eq!(word >> 26, 0b001000);
        // Raw decode is zero-extended; sign interpretation is the caller's job.
        assert_eq!(enc.decode_raw(word), vec![9, 10, 0xff9c]);
    }

    #[test]
    fn test_j_format() {
        let enc = Encoding::parse("000010 ffffffffffffffffffffffffff");
        let word = enc.encode(&[0x0010_0000]);
        assert_eq!(enc.decode_raw(word), vec![0x0010_0000]);
    }

    #[test]
    fn test_short_field() {
        // movf $t1,$t2,1 has a 3-bit third operand
        let enc = Encoding::parse("000000 sssss ttt 00 fffff 00000 000001");
        let word = enc.encode(&[9, 10, 5]);
        assert_eq!(enc.decode_raw(word), vec![9, 10, 5]);
        assert!(enc.matches(word));
    }

    #[test]
    fn test_fixed_word() {
        let enc = Encoding::parse("000000 00000 00000 00000 00000 001100");
        assert_eq!(enc.mask, u32::MAX);
        assert_eq!(enc.encode(&[]), 0x0000_000c);
        assert!(enc.matches(0x0000_000c));
        assert!(!enc.matches(0x0000_000d));
    }

    #[test]
    #[should_panic]
    fn test_malformed_pattern_is_a_bug() {
        Encoding::parse("000000 sssss");
    }
}
