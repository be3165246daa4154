//! Latin <-> Cyrillic transliteration for search-query variants.
//!
//! The portal's morphology search does not bridge scripts: a filter
//! keyword "dell" will never surface "делл" and vice versa. Every search
//! keyword therefore fans out into at most two query variants, the
//! original plus its phonetic rendering in the other script.

/// Query variants for one keyword: the keyword itself, plus one
/// transliteration when the keyword is single-script. Never more than
/// two entries.
pub fn query_variants(keyword: &str) -> Vec<String> {
    let trimmed = keyword.trim();
    let mut variants = vec![trimmed.to_string()];
    if let Some(other) = transliterate(trimmed) {
        if !other.is_empty() && other != trimmed.to_lowercase() {
            variants.push(other);
        }
    }
    variants
}

/// Phonetic rendering in the other script, or None for mixed-script or
/// non-alphabetic input.
pub fn transliterate(word: &str) -> Option<String> {
    let lower = word.trim().to_lowercase();
    if lower.is_empty() {
        return None;
    }
    let has_latin = lower.chars().any(|c| c.is_ascii_alphabetic());
    let has_cyrillic = lower.chars().any(is_cyrillic);
    match (has_latin, has_cyrillic) {
        (true, false) => Some(latin_to_cyrillic(&lower)),
        (false, true) => Some(cyrillic_to_latin(&lower)),
        _ => None,
    }
}

fn is_cyrillic(c: char) -> bool {
    ('\u{0400}'..='\u{04FF}').contains(&c)
}

// Digraphs first, longest match wins.
const LATIN_DIGRAPHS: &[(&str, &str)] = &[
    ("shch", "щ"),
    ("sch", "ш"),
    ("sh", "ш"),
    ("ch", "ч"),
    ("zh", "ж"),
    ("kh", "х"),
    ("ts", "ц"),
    ("yu", "ю"),
    ("ya", "я"),
    ("yo", "ё"),
    ("ph", "ф"),
    ("ck", "к"),
    ("oo", "у"),
    ("ee", "и"),
];

fn latin_to_cyrillic(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    let chars: Vec<char> = word.chars().collect();
    let mut i = 0;
    'outer: while i < chars.len() {
        let rest: String = chars[i..].iter().collect();
        for (digraph, replacement) in LATIN_DIGRAPHS {
            if rest.starts_with(digraph) {
                out.push_str(replacement);
                i += digraph.len();
                continue 'outer;
            }
        }
        out.push_str(match chars[i] {
            'a' => "а",
            'b' => "б",
            'c' => "к",
            'd' => "д",
            'e' => "е",
            'f' => "ф",
            'g' => "г",
            'h' => "х",
            'i' => "и",
            'j' => "дж",
            'k' => "к",
            'l' => "л",
            'm' => "м",
            'n' => "н",
            'o' => "о",
            'p' => "п",
            'q' => "к",
            'r' => "р",
            's' => "с",
            't' => "т",
            'u' => "у",
            'v' => "в",
            'w' => "в",
            'x' => "кс",
            'y' => "и",
            'z' => "з",
            other => {
                out.push(other);
                i += 1;
                continue 'outer;
            }
        });
        i += 1;
    }
    out
}

fn cyrillic_to_latin(word: &str) -> String {
    let mut out = String::with_capacity(word.len() * 2);
    for c in word.chars() {
        out.push_str(match c {
            'а' => "a",
            'б' => "b",
            'в' => "v",
            'г' => "g",
            'д' => "d",
            'е' => "e",
            'ё' => "yo",
            'ж' => "zh",
            'з' => "z",
            'и' => "i",
            'й' => "y",
            'к' => "k",
            'л' => "l",
            'м' => "m",
            'н' => "n",
            'о' => "o",
            'п' => "p",
            'р' => "r",
            'с' => "s",
            'т' => "t",
            'у' => "u",
            'ф' => "f",
            'х' => "kh",
            'ц' => "ts",
            'ч' => "ch",
            'ш' => "sh",
            'щ' => "shch",
            'ъ' => "",
            'ы' => "y",
            'ь' => "",
            'э' => "e",
            'ю' => "yu",
            'я' => "ya",
            other => {
                out.push(other);
                continue;
            }
        });
    }
    out
}
