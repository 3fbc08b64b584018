//! Stopword tables per language family
//!
//! The sets are deliberately compact: function words that carry no imagery.
//! They back the gate's content-token extraction and the anchor realization
//! "stopword-only" check, so precision matters more than coverage here.

pub const EN: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "nor", "so", "yet", "if", "then", "than", "that",
    "this", "these", "those", "of", "in", "on", "at", "to", "from", "by", "with", "for",
    "about", "into", "onto", "over", "under", "through", "between", "against", "during",
    "before", "after", "above", "below", "up", "down", "out", "off", "as", "is", "am",
    "are", "was", "were", "be", "been", "being", "do", "does", "did", "have", "has", "had",
    "will", "would", "shall", "should", "can", "could", "may", "might", "must", "i", "you",
    "he", "she", "it", "we", "they", "me", "him", "her", "us", "them", "my", "your", "his",
    "its", "our", "their", "mine", "yours", "hers", "ours", "theirs", "not", "no", "there",
    "here", "what", "which", "who", "whom", "whose", "when", "where", "why", "how", "all",
    "each", "every", "both", "few", "more", "most", "some", "any", "such", "only", "own",
    "same", "too", "very", "just",
];

pub const FR: &[&str] = &[
    "le", "la", "les", "un", "une", "des", "du", "de", "d'", "au", "aux", "et", "ou",
    "mais", "donc", "or", "ni", "car", "si", "que", "qui", "quoi", "dont", "où", "ce",
    "cet", "cette", "ces", "dans", "sur", "sous", "vers", "avec", "sans", "pour", "par",
    "entre", "chez", "avant", "après", "pendant", "contre", "depuis", "est", "sont",
    "était", "étaient", "être", "été", "avoir", "a", "ont", "avait", "je", "tu", "il",
    "elle", "on", "nous", "vous", "ils", "elles", "me", "te", "se", "lui", "leur", "y",
    "en", "mon", "ma", "mes", "ton", "ta", "tes", "son", "sa", "ses", "notre", "nos",
    "votre", "vos", "leurs", "ne", "pas", "plus", "moins", "très", "bien", "tout",
    "toute", "tous", "toutes", "quel", "quelle", "quels", "quelles", "comme",
];

pub const ES: &[&str] = &[
    "el", "la", "los", "las", "un", "una", "unos", "unas", "y", "e", "o", "u", "pero",
    "sino", "si", "que", "quien", "cuyo", "donde", "cuando", "como", "de", "del", "en",
    "a", "al", "por", "para", "con", "sin", "sobre", "bajo", "entre", "hacia", "hasta",
    "desde", "durante", "contra", "es", "son", "era", "eran", "ser", "sido", "estar",
    "está", "están", "estaba", "hay", "ha", "han", "había", "yo", "tú", "él", "ella",
    "usted", "nosotros", "nosotras", "vosotros", "vosotras", "ellos", "ellas", "ustedes",
    "me", "te", "se", "nos", "os", "le", "les", "lo", "mi", "mis", "tu", "tus", "su",
    "sus", "nuestro", "nuestra", "nuestros", "nuestras", "no", "ni", "más", "menos",
    "muy", "todo", "toda", "todos", "todas", "cada", "este", "esta", "estos", "estas",
    "ese", "esa", "esos", "esas",
];

pub const DE: &[&str] = &[
    "der", "die", "das", "den", "dem", "des", "ein", "eine", "einen", "einem", "einer",
    "eines", "und", "oder", "aber", "sondern", "denn", "wenn", "dass", "daß", "weil",
    "ob", "als", "wie", "in", "im", "an", "am", "auf", "aus", "bei", "beim", "mit",
    "nach", "seit", "von", "vom", "zu", "zum", "zur", "durch", "für", "gegen", "ohne",
    "um", "über", "unter", "vor", "zwischen", "hinter", "neben", "ist", "sind", "war",
    "waren", "sein", "gewesen", "werden", "wird", "wurde", "wurden", "haben", "hat",
    "hatte", "hatten", "ich", "du", "er", "sie", "es", "wir", "ihr", "mich", "dich",
    "sich", "uns", "euch", "ihm", "ihn", "ihnen", "mein", "dein", "ihrer", "unser",
    "euer", "nicht", "kein", "keine", "mehr", "sehr", "auch", "noch", "nur", "schon",
    "alle", "jeder", "jede", "jedes", "dieser", "diese", "dieses", "so",
];

pub const PT: &[&str] = &[
    "o", "a", "os", "as", "um", "uma", "uns", "umas", "e", "ou", "mas", "nem", "se",
    "que", "quem", "qual", "onde", "quando", "como", "de", "do", "da", "dos", "das",
    "em", "no", "na", "nos", "nas", "por", "pelo", "pela", "pelos", "pelas", "para",
    "com", "sem", "sobre", "sob", "entre", "até", "desde", "contra", "durante", "é",
    "são", "era", "eram", "ser", "sido", "estar", "está", "estão", "estava", "há",
    "tem", "têm", "tinha", "eu", "tu", "ele", "ela", "você", "nós", "vós", "eles",
    "elas", "vocês", "me", "te", "lhe", "lhes", "meu", "minha", "meus", "minhas",
    "teu", "tua", "seu", "sua", "seus", "suas", "nosso", "nossa", "nossos", "nossas",
    "não", "mais", "menos", "muito", "muita", "todo", "toda", "todos", "todas",
    "cada", "este", "esta", "estes", "estas", "esse", "essa", "esses", "essas", "isso",
    "isto", "aquele", "aquela",
];

pub const IT: &[&str] = &[
    "il", "lo", "la", "i", "gli", "le", "un", "uno", "una", "e", "ed", "o", "od", "ma",
    "però", "se", "che", "chi", "cui", "dove", "quando", "come", "di", "del", "dello",
    "della", "dei", "degli", "delle", "a", "al", "allo", "alla", "ai", "agli", "alle",
    "da", "dal", "dallo", "dalla", "dai", "dagli", "dalle", "in", "nel", "nello",
    "nella", "nei", "negli", "nelle", "su", "sul", "sullo", "sulla", "sui", "sugli",
    "sulle", "per", "con", "senza", "tra", "fra", "contro", "verso", "durante", "è",
    "sono", "era", "erano", "essere", "stato", "stare", "sta", "stanno", "ha", "hanno",
    "aveva", "io", "tu", "lui", "lei", "noi", "voi", "loro", "mi", "ti", "si", "ci",
    "vi", "mio", "mia", "miei", "mie", "tuo", "tua", "suo", "sua", "nostro", "nostra",
    "vostro", "vostra", "non", "più", "meno", "molto", "tutto", "tutta", "tutti",
    "tutte", "ogni", "questo", "questa", "questi", "queste", "quello", "quella",
];
