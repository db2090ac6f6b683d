use nanoid::nanoid;

/// Alphabet used for pseudorandom identifiers, aliases and placeholders.
pub const DEFAULT_ALPHABET: &[char] = &[
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w',
    'x', 'y', 'z', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S', 'T',
    'U', 'V', 'W', 'X', 'Y', 'Z', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
];

/// Lowercase alphanumeric alphabet (record ids, temp names).
pub const LOWER_ALPHANUM: &[char] = &[
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w',
    'x', 'y', 'z', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
];

/// Random `[A-Za-z0-9]` string of the given length.
pub fn pseudorandom_string(length: usize) -> String {
    random_string_with_alphabet(length, DEFAULT_ALPHABET)
}

pub fn random_string_with_alphabet(length: usize, alphabet: &[char]) -> String {
    match alphabet {
        _ if length == 0 => String::new(),
        [] => String::new(),
        [single] => std::iter::repeat_n(*single, length).collect(),
        _ => nanoid!(length, alphabet),
    }
}

/// IEEE CRC32 checksum rendered as a decimal string.
pub fn crc32_checksum(value: &str) -> String {
    crc32fast::hash(value.as_bytes()).to_string()
}

/// Generates a random string from a restricted regex-like pattern.
///
/// Supported syntax: literal characters, `\` escapes and character classes such as
/// `[a-z0-9_]`, each optionally followed by `{n}` or `{min,max}`.
pub fn random_string_by_regex(pattern: &str) -> Result<String, String> {
    let chars: Vec<char> = pattern.trim_start_matches('^').trim_end_matches('$').chars().collect();
    let mut out = String::new();
    let mut i = 0;

    while i < chars.len() {
        let alphabet: Vec<char> = match chars[i] {
            '[' => {
                let end = chars[i..]
                    .iter()
                    .position(|c| *c == ']')
                    .map(|p| p + i)
                    .ok_or_else(|| format!("unterminated character class in {pattern:?}"))?;
                let class = expand_class(&chars[i + 1..end])?;
                i = end + 1;
                class
            }
            '\\' => {
                let escaped = *chars.get(i + 1).ok_or_else(|| format!("dangling escape in {pattern:?}"))?;
                i += 2;
                match escaped {
                    'd' => ('0'..='9').collect(),
                    'w' => LOWER_ALPHANUM.iter().copied().chain(['_']).collect(),
                    other => vec![other],
                }
            }
            '(' | ')' | '|' | '*' | '+' | '?' | '.' => {
                return Err(format!("unsupported pattern token {:?} in {pattern:?}", chars[i]));
            }
            literal => {
                i += 1;
                vec![literal]
            }
        };

        let (min, max) = if chars.get(i) == Some(&'{') {
            let end = chars[i..]
                .iter()
                .position(|c| *c == '}')
                .map(|p| p + i)
                .ok_or_else(|| format!("unterminated quantifier in {pattern:?}"))?;
            let spec: String = chars[i + 1..end].iter().collect();
            i = end + 1;
            parse_quantifier(&spec).ok_or_else(|| format!("invalid quantifier {{{spec}}} in {pattern:?}"))?
        } else {
            (1, 1)
        };

        let count = if max > min { min + random_below(max - min + 1) } else { min };
        out.push_str(&random_string_with_alphabet(count, &alphabet));
    }

    Ok(out)
}

fn expand_class(class: &[char]) -> Result<Vec<char>, String> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < class.len() {
        if i + 2 < class.len() && class[i + 1] == '-' {
            let (start, end) = (class[i], class[i + 2]);
            if start > end {
                return Err(format!("invalid class range {start}-{end}"));
            }
            out.extend(start..=end);
            i += 3;
        } else {
            out.push(class[i]);
            i += 1;
        }
    }
    if out.is_empty() {
        return Err("empty character class".to_string());
    }
    out.dedup();
    Ok(out)
}

fn parse_quantifier(spec: &str) -> Option<(usize, usize)> {
    match spec.split_once(',') {
        Some((min, max)) => {
            let min = min.trim().parse().ok()?;
            let max = max.trim().parse().ok()?;
            (min <= max).then_some((min, max))
        }
        None => {
            let n = spec.trim().parse().ok()?;
            Some((n, n))
        }
    }
}

/// Uniformly distributed value in `0..bound`.
fn random_below(bound: usize) -> usize {
    let bound = bound as u64;
    // reject the tail that would bias the modulo
    let zone = u64::MAX - u64::MAX % bound;
    loop {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&nanoid::rngs::default(8));
        let value = u64::from_le_bytes(bytes);
        if value < zone {
            return (value % bound) as usize;
        }
    }
}
