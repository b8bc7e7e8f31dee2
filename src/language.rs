//! 名称语言选择与转写

use serde::{Deserialize, Serialize};

/// 名称显示策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LanguagePreference {
    /// 只显示本地名
    NativeOnly,
    /// 有译名用译名，否则本地名
    #[default]
    LocalizedOrNative,
    /// 本地名 + 译名
    NativeAndLocalized,
    /// 本地名 + (译名或转写)
    NativeAndLocalizedOrTransliterated,
    /// 译名 + 本地名
    LocalizedAndNative,
    /// (译名或转写) + 本地名
    LocalizedOrTransliteratedAndNative,
    /// 译名，否则转写
    LocalizedOrTransliterated,
}

/// 按策略选择要显示的名称 (主名称在前)
///
/// 本地名与译名相同时只保留本地名。
pub fn select_captions(
    preference: LanguagePreference,
    native: Option<&str>,
    localized: Option<&str>,
) -> Vec<String> {
    let native = native.filter(|s| !s.is_empty());
    let localized = localized.filter(|s| !s.is_empty());
    let localized = match (native, localized) {
        (Some(n), Some(l)) if n == l => None,
        (_, l) => l,
    };
    let localized_or_translit =
        || localized.map(str::to_string).or_else(|| native.map(transliterate));

    let (primary, secondary) = match preference {
        LanguagePreference::NativeOnly => (native.map(str::to_string), None),
        LanguagePreference::LocalizedOrNative => (
            localized.or(native).map(str::to_string),
            None,
        ),
        LanguagePreference::NativeAndLocalized => {
            (native.map(str::to_string), localized.map(str::to_string))
        }
        LanguagePreference::NativeAndLocalizedOrTransliterated => {
            (native.map(str::to_string), localized_or_translit())
        }
        LanguagePreference::LocalizedAndNative => {
            (localized.map(str::to_string), native.map(str::to_string))
        }
        LanguagePreference::LocalizedOrTransliteratedAndNative => {
            (localized_or_translit(), native.map(str::to_string))
        }
        LanguagePreference::LocalizedOrTransliterated => (localized_or_translit(), None),
    };

    let mut captions = Vec::with_capacity(2);
    for caption in [primary, secondary].into_iter().flatten() {
        if !caption.is_empty() && !captions.contains(&caption) {
            captions.push(caption);
        }
    }
    captions
}

/// 西里尔 / 希腊字母转写为拉丁字母，其余字符原样保留
pub fn transliterate(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        let lower = c.to_lowercase().next().unwrap_or(c);
        match latin_for(lower) {
            Some(latin) if c != lower => {
                let mut chars = latin.chars();
                if let Some(first) = chars.next() {
                    out.extend(first.to_uppercase());
                    out.push_str(chars.as_str());
                }
            }
            Some(latin) => out.push_str(latin),
            None => out.push(c),
        }
    }
    out
}

fn latin_for(c: char) -> Option<&'static str> {
    let s = match c {
        // 西里尔
        'а' => "a",
        'б' => "b",
        'в' => "v",
        'г' => "g",
        'ґ' => "g",
        'д' => "d",
        'е' => "e",
        'ё' => "yo",
        'є' => "ye",
        'ж' => "zh",
        'з' => "z",
        'и' => "i",
        'і' => "i",
        'ї' => "yi",
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
        'ў' => "u",
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
        // 希腊
        'α' | 'ά' => "a",
        'β' => "v",
        'γ' => "g",
        'δ' => "d",
        'ε' | 'έ' => "e",
        'ζ' => "z",
        'η' | 'ή' => "i",
        'θ' => "th",
        'ι' | 'ί' | 'ϊ' | 'ΐ' => "i",
        'κ' => "k",
        'λ' => "l",
        'μ' => "m",
        'ν' => "n",
        'ξ' => "x",
        'ο' | 'ό' => "o",
        'π' => "p",
        'ρ' => "r",
        'σ' | 'ς' => "s",
        'τ' => "t",
        'υ' | 'ύ' | 'ϋ' | 'ΰ' => "y",
        'φ' => "f",
        'χ' => "ch",
        'ψ' => "ps",
        'ω' | 'ώ' => "o",
        _ => return None,
    };
    Some(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transliteration() {
        assert_eq!(transliterate("Москва"), "Moskva");
        assert_eq!(transliterate("Αθήνα"), "Athina");
        assert_eq!(transliterate("Berlin 1"), "Berlin 1");
        assert_eq!(transliterate("Щука"), "Shchuka");
    }

    #[test]
    fn test_selection_variants() {
        let native = Some("Москва");
        let localized = Some("Moscow");
        use LanguagePreference::*;
        assert_eq!(select_captions(NativeOnly, native, localized), vec!["Москва"]);
        assert_eq!(select_captions(LocalizedOrNative, native, localized), vec!["Moscow"]);
        assert_eq!(select_captions(LocalizedOrNative, native, None), vec!["Москва"]);
        assert_eq!(
            select_captions(NativeAndLocalized, native, localized),
            vec!["Москва", "Moscow"]
        );
        assert_eq!(
            select_captions(NativeAndLocalizedOrTransliterated, native, None),
            vec!["Москва", "Moskva"]
        );
        assert_eq!(
            select_captions(LocalizedAndNative, native, localized),
            vec!["Moscow", "Москва"]
        );
        assert_eq!(
            select_captions(LocalizedOrTransliteratedAndNative, native, None),
            vec!["Moskva", "Москва"]
        );
        assert_eq!(select_captions(LocalizedOrTransliterated, native, None), vec!["Moskva"]);
    }

    #[test]
    fn test_equal_names_collapse_to_native() {
        let captions = select_captions(
            LanguagePreference::NativeAndLocalized,
            Some("Paris"),
            Some("Paris"),
        );
        assert_eq!(captions, vec!["Paris"]);
        // 拉丁名称转写后不变，也只保留一个
        let captions = select_captions(
            LanguagePreference::NativeAndLocalizedOrTransliterated,
            Some("Paris"),
            None,
        );
        assert_eq!(captions, vec!["Paris"]);
    }
}
