//! Nucleotide classification helpers shared by the validator, variant table and
//! codon translation.

/// Returns `true` for any valid nucleotide character: `ACGTU`, `N`, IUPAC codes
/// or a gap (`-`), case-insensitive.
pub fn is_nucleotide(base: u8) -> bool {
    matches!(
        base.to_ascii_lowercase(),
        b'a' | b'c' | b'g' | b't' | b'u' | b'n' | b'-'
    ) || is_iupac_ambiguous(base)
}

/// Returns `true` for the canonical bases `ACGT`, case-insensitive.
pub fn is_acgt(base: u8) -> bool {
    matches!(base.to_ascii_lowercase(), b'a' | b'c' | b'g' | b't')
}

/// Returns `true` for IUPAC ambiguity codes other than `N`.
pub fn is_iupac_ambiguous(base: u8) -> bool {
    matches!(
        base.to_ascii_lowercase(),
        b'r' | b'y' | b's' | b'w' | b'k' | b'm' | b'b' | b'd' | b'h' | b'v'
    )
}

/// Returns `true` for bases that carry no information: `N` or gap.
pub fn is_no_call(base: u8) -> bool {
    matches!(base.to_ascii_lowercase(), b'n' | b'-')
}

/// Watson-Crick complement preserving case; IUPAC codes map to their complements.
pub fn complement(base: u8) -> u8 {
    let lower = base.is_ascii_lowercase();
    let comp = match base.to_ascii_uppercase() {
        b'A' => b'T',
        b'T' | b'U' => b'A',
        b'C' => b'G',
        b'G' => b'C',
        b'R' => b'Y',
        b'Y' => b'R',
        b'K' => b'M',
        b'M' => b'K',
        b'B' => b'V',
        b'V' => b'B',
        b'D' => b'H',
        b'H' => b'D',
        other => other,
    };
    if lower {
        comp.to_ascii_lowercase()
    } else {
        comp
    }
}

/// Reverse-complement a sequence in place.
pub fn reverse_complement(bases: &mut [u8]) {
    bases.reverse();
    for base in bases.iter_mut() {
        *base = complement(*base);
    }
}
