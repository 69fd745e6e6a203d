//! Standard genetic code.

/// Amino acids for codons in TCAG order (first base slowest).
const STANDARD_CODE: &[u8; 64] =
    b"FFLLSSSSYY**CC*WLLLLPPPPHHQQRRRRIIIMTTTTNNKKSSRRVVVVAAAADDEEGGGG";

fn base_index(base: u8) -> Option<usize> {
    match base.to_ascii_uppercase() {
        b'T' | b'U' => Some(0),
        b'C' => Some(1),
        b'A' => Some(2),
        b'G' => Some(3),
        _ => None,
    }
}

/// One-letter amino acid for a codon: `*` for stop, `X` when any base is
/// not A, C, G or T.
pub fn translate_codon(codon: [u8; 3]) -> u8 {
    let [a, b, c] = codon;
    match (base_index(a), base_index(b), base_index(c)) {
        (Some(a), Some(b), Some(c)) => STANDARD_CODE[a * 16 + b * 4 + c],
        _ => b'X',
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(*b"ATG", b'M' ; "start")]
    #[test_case(*b"TAA", b'*' ; "ochre stop")]
    #[test_case(*b"TGA", b'*' ; "opal stop")]
    #[test_case(*b"TGG", b'W' ; "tryptophan")]
    #[test_case(*b"gct", b'A' ; "lower case")]
    #[test_case(*b"AAT", b'N' ; "asparagine")]
    #[test_case(*b"GGN", b'X' ; "unknown base")]
    fn translates(codon: [u8; 3], expected: u8) {
        assert_eq!(translate_codon(codon), expected);
    }
}
