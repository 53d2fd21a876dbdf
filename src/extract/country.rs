//! Country code normalization tables.

use crate::core::types::{Fact, UNKNOWN_COUNTRY};

const ALPHA2_TO_ALPHA3: &[(&str, &str)] = &[
    ("am", "arm"),
    ("az", "aze"),
    ("bo", "bol"),
    ("by", "blr"),
    ("ci", "civ"),
    ("cm", "cmr"),
    ("co", "col"),
    ("dz", "dza"),
    ("fi", "fin"),
    ("ge", "geo"),
    ("gh", "gha"),
    ("il", "isr"),
    ("in", "ind"),
    ("kg", "kgz"),
    ("kz", "kaz"),
    ("lt", "ltu"),
    ("md", "mda"),
    ("mz", "moz"),
    ("na", "nam"),
    ("no", "nor"),
    ("pk", "pak"),
    ("rs", "srb"),
    ("ru", "rus"),
    ("sn", "sen"),
    ("tj", "tjk"),
    ("tm", "tkm"),
    ("uz", "uzb"),
    ("zm", "zmb"),
];

const DISPLAY_NAMES: &[(&str, &str)] = &[
    ("arm", "Армения"),
    ("aze", "Азербайджан"),
    ("blr", "Беларусь"),
    ("bol", "Боливия"),
    ("civ", "Кот-д’Ивуар"),
    ("cmr", "Камерун"),
    ("col", "Колумбия"),
    ("dza", "Алжир"),
    ("fin", "Финляндия"),
    ("geo", "Грузия"),
    ("gha", "Гана"),
    ("ind", "Индия"),
    ("isr", "Израиль"),
    ("kaz", "Казахстан"),
    ("kgz", "Кыргызстан"),
    ("ltu", "Литва"),
    ("mda", "Молдавия"),
    // legacy code still used by some admin pages
    ("mol", "Молдавия"),
    ("moz", "Мозамбик"),
    ("nam", "Намибия"),
    ("nor", "Норвегия"),
    ("pak", "Пакистан"),
    ("rus", "Россия"),
    ("sen", "Сенегал"),
    ("srb", "Сербия"),
    ("tjk", "Таджикистан"),
    ("tkm", "Туркменистан"),
    ("uzb", "Узбекистан"),
    ("zmb", "Замбия"),
];

/// Upgrade a 2-letter code to its 3-letter form. Case-insensitive.
pub fn to_alpha3(code: &str) -> Option<&'static str> {
    let code = code.to_ascii_lowercase();
    ALPHA2_TO_ALPHA3
        .iter()
        .find(|(a2, _)| *a2 == code)
        .map(|(_, a3)| *a3)
}

/// Russian display name for a 3-letter code. Case-insensitive.
pub fn display_name(alpha3: &str) -> Option<&'static str> {
    let code = alpha3.to_ascii_lowercase();
    DISPLAY_NAMES
        .iter()
        .find(|(a3, _)| *a3 == code)
        .map(|(_, name)| *name)
}

/// Build a country fact from a raw 2- or 3-letter code.
///
/// Untranslated codes are still facts: the key is the raw code upper-cased and
/// the name is [`UNKNOWN_COUNTRY`].
pub fn normalize(raw: &str) -> Fact {
    let raw = raw.trim();
    let alpha3 = if raw.len() == 2 {
        to_alpha3(raw).map(str::to_string)
    } else {
        Some(raw.to_ascii_lowercase())
    };

    match alpha3.as_deref().and_then(|a3| display_name(a3).map(|n| (a3, n))) {
        Some((a3, name)) => Fact::Country {
            code: a3.to_ascii_uppercase(),
            name: name.to_string(),
        },
        None => Fact::Country {
            code: raw.to_ascii_uppercase(),
            name: UNKNOWN_COUNTRY.to_string(),
        },
    }
}
