//! Static lookup tables for opener classification and gate lexicons
//!
//! Flat per-family sets. Tokens are matched after `core-lexicon`
//! normalization, so everything here is lowercase with straight apostrophes.

use once_cell::sync::Lazy;
use std::collections::HashSet;

use verso_core_lexicon::LanguageFamily;

type Table = Lazy<HashSet<&'static str>>;

static PRONOUNS_EN: Table = Lazy::new(|| {
    [
        "i", "you", "he", "she", "it", "we", "they", "me", "him", "her", "us", "them",
        "my", "your", "his", "its", "our", "their",
    ]
    .into_iter()
    .collect()
});

static PRONOUNS_FR: Table = Lazy::new(|| {
    [
        "je", "tu", "il", "elle", "on", "nous", "vous", "ils", "elles", "me", "te", "se",
        "moi", "toi", "lui", "mon", "ma", "mes", "ton", "ta", "tes", "son", "sa", "ses",
        "notre", "nos", "votre", "vos", "leur", "leurs",
    ]
    .into_iter()
    .collect()
});

static PRONOUNS_ES: Table = Lazy::new(|| {
    [
        "yo", "tú", "tu", "él", "ella", "usted", "nosotros", "nosotras", "vosotros",
        "vosotras", "ellos", "ellas", "ustedes", "me", "te", "se", "nos", "mi", "mis",
        "su", "sus", "nuestro", "nuestra",
    ]
    .into_iter()
    .collect()
});

static PRONOUNS_DE: Table = Lazy::new(|| {
    [
        "ich", "du", "er", "sie", "es", "wir", "ihr", "mich", "dich", "sich", "uns",
        "euch", "mein", "meine", "dein", "deine", "sein", "seine", "unser", "unsere",
    ]
    .into_iter()
    .collect()
});

static PRONOUNS_PT: Table = Lazy::new(|| {
    [
        "eu", "tu", "ele", "ela", "você", "nós", "vós", "eles", "elas", "vocês", "me",
        "te", "se", "nos", "meu", "minha", "teu", "tua", "seu", "sua", "nosso", "nossa",
    ]
    .into_iter()
    .collect()
});

static PRONOUNS_IT: Table = Lazy::new(|| {
    [
        "io", "tu", "lui", "lei", "noi", "voi", "loro", "mi", "ti", "si", "ci", "vi",
        "mio", "mia", "tuo", "tua", "suo", "sua", "nostro", "nostra",
    ]
    .into_iter()
    .collect()
});

static PREPOSITIONS_EN: Table = Lazy::new(|| {
    [
        "in", "on", "at", "to", "from", "by", "with", "for", "about", "into", "onto",
        "over", "under", "through", "between", "against", "during", "before", "after",
        "above", "below", "beneath", "beside", "beyond", "near", "within", "without",
        "among", "along", "across", "behind", "toward", "towards", "upon",
    ]
    .into_iter()
    .collect()
});

static PREPOSITIONS_FR: Table = Lazy::new(|| {
    [
        "dans", "sur", "sous", "vers", "avec", "sans", "pour", "par", "entre", "chez",
        "avant", "après", "pendant", "contre", "depuis", "derrière", "devant", "près",
        "parmi", "malgré", "selon", "à", "de", "en",
    ]
    .into_iter()
    .collect()
});

static PREPOSITIONS_ES: Table = Lazy::new(|| {
    [
        "en", "a", "de", "por", "para", "con", "sin", "sobre", "bajo", "entre", "hacia",
        "hasta", "desde", "durante", "contra", "ante", "tras", "según",
    ]
    .into_iter()
    .collect()
});

static PREPOSITIONS_DE: Table = Lazy::new(|| {
    [
        "in", "im", "an", "am", "auf", "aus", "bei", "beim", "mit", "nach", "seit",
        "von", "vom", "zu", "zum", "zur", "durch", "für", "gegen", "ohne", "um", "über",
        "unter", "vor", "zwischen", "hinter", "neben",
    ]
    .into_iter()
    .collect()
});

static PREPOSITIONS_PT: Table = Lazy::new(|| {
    [
        "em", "no", "na", "nos", "nas", "a", "ao", "à", "de", "do", "da", "por", "pelo",
        "pela", "para", "com", "sem", "sobre", "sob", "entre", "até", "desde", "contra",
        "durante", "perante",
    ]
    .into_iter()
    .collect()
});

static PREPOSITIONS_IT: Table = Lazy::new(|| {
    [
        "in", "nel", "nella", "su", "sul", "sulla", "a", "al", "alla", "di", "del",
        "della", "da", "dal", "dalla", "per", "con", "senza", "tra", "fra", "contro",
        "verso", "durante", "sopra", "sotto", "dentro", "fuori",
    ]
    .into_iter()
    .collect()
});

static DETERMINERS_EN: Table = Lazy::new(|| {
    [
        "the", "a", "an", "this", "that", "these", "those", "each", "every", "some",
        "any", "no", "another",
    ]
    .into_iter()
    .collect()
});

static DETERMINERS_FR: Table = Lazy::new(|| {
    [
        "le", "la", "les", "un", "une", "des", "du", "ce", "cet", "cette", "ces",
        "chaque", "quelque", "quelques", "aucun", "aucune", "l'",
    ]
    .into_iter()
    .collect()
});

static DETERMINERS_ES: Table = Lazy::new(|| {
    [
        "el", "la", "los", "las", "un", "una", "unos", "unas", "este", "esta", "estos",
        "estas", "ese", "esa", "esos", "esas", "cada", "algún", "alguna", "ningún",
    ]
    .into_iter()
    .collect()
});

static DETERMINERS_DE: Table = Lazy::new(|| {
    [
        "der", "die", "das", "den", "dem", "des", "ein", "eine", "einen", "einem",
        "einer", "eines", "dieser", "diese", "dieses", "jeder", "jede", "jedes", "kein",
        "keine",
    ]
    .into_iter()
    .collect()
});

static DETERMINERS_PT: Table = Lazy::new(|| {
    [
        "o", "a", "os", "as", "um", "uma", "uns", "umas", "este", "esta", "estes",
        "estas", "esse", "essa", "esses", "essas", "cada", "algum", "alguma", "nenhum",
    ]
    .into_iter()
    .collect()
});

static DETERMINERS_IT: Table = Lazy::new(|| {
    [
        "il", "lo", "la", "i", "gli", "le", "un", "uno", "una", "questo", "questa",
        "questi", "queste", "quello", "quella", "ogni", "qualche", "nessun", "nessuna",
    ]
    .into_iter()
    .collect()
});

pub fn pronouns(lang: LanguageFamily) -> &'static HashSet<&'static str> {
    match lang {
        LanguageFamily::English => &PRONOUNS_EN,
        LanguageFamily::French => &PRONOUNS_FR,
        LanguageFamily::Spanish => &PRONOUNS_ES,
        LanguageFamily::German => &PRONOUNS_DE,
        LanguageFamily::Portuguese => &PRONOUNS_PT,
        LanguageFamily::Italian => &PRONOUNS_IT,
    }
}

pub fn prepositions(lang: LanguageFamily) -> &'static HashSet<&'static str> {
    match lang {
        LanguageFamily::English => &PREPOSITIONS_EN,
        LanguageFamily::French => &PREPOSITIONS_FR,
        LanguageFamily::Spanish => &PREPOSITIONS_ES,
        LanguageFamily::German => &PREPOSITIONS_DE,
        LanguageFamily::Portuguese => &PREPOSITIONS_PT,
        LanguageFamily::Italian => &PREPOSITIONS_IT,
    }
}

pub fn determiners(lang: LanguageFamily) -> &'static HashSet<&'static str> {
    match lang {
        LanguageFamily::English => &DETERMINERS_EN,
        LanguageFamily::French => &DETERMINERS_FR,
        LanguageFamily::Spanish => &DETERMINERS_ES,
        LanguageFamily::German => &DETERMINERS_DE,
        LanguageFamily::Portuguese => &DETERMINERS_PT,
        LanguageFamily::Italian => &DETERMINERS_IT,
    }
}

/// Motion verbs in the walk/stroll/wander bucket, across families
///
/// Inflected forms are listed explicitly; matching is exact-token.
pub static WALK_VERBS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // English
        "walk", "walks", "walked", "walking", "stroll", "strolls", "strolled",
        "strolling", "step", "steps", "stepped", "stepping", "wander", "wanders",
        "wandered", "wandering", "march", "marches", "marched", "marching",
        // French
        "marche", "marches", "marchons", "marchez", "marchent", "marcher", "marchait",
        // Spanish
        "caminar", "camino", "caminas", "camina", "caminamos", "caminan", "caminaba",
        // Italian
        "cammino", "cammini", "cammina", "camminiamo", "camminano", "camminare",
    ]
    .into_iter()
    .collect()
});

/// CJK simile characters checked as raw substrings in source lines
pub const COMPARISON_MARKERS_CJK: &[&str] = &["像", "如同", "仿佛", "好像", "犹如"];
