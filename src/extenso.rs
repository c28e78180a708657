//! Amount-in-words rendering for the invoice legal line (pt-BR).

const UNITS: [&str; 10] = [
    "", "um", "dois", "três", "quatro", "cinco", "seis", "sete", "oito", "nove",
];
const TEENS: [&str; 10] = [
    "dez",
    "onze",
    "doze",
    "treze",
    "quatorze",
    "quinze",
    "dezesseis",
    "dezessete",
    "dezoito",
    "dezenove",
];
const TENS: [&str; 10] = [
    "", "", "vinte", "trinta", "quarenta", "cinquenta", "sessenta", "setenta", "oitenta",
    "noventa",
];
const HUNDREDS: [&str; 10] = [
    "",
    "cento",
    "duzentos",
    "trezentos",
    "quatrocentos",
    "quinhentos",
    "seiscentos",
    "setecentos",
    "oitocentos",
    "novecentos",
];

/// Converts a 1..=999 group to words. Zero yields an empty string so the
/// caller can skip empty groups when joining.
fn group_to_words(n: u64) -> String {
    if n == 0 {
        return String::new();
    }
    if n == 100 {
        return "cem".to_string();
    }

    let c = (n / 100) as usize;
    let d = ((n % 100) / 10) as usize;
    let u = (n % 10) as usize;

    let mut out = String::new();

    if c > 0 {
        out.push_str(HUNDREDS[c]);
    }

    if d == 1 {
        if !out.is_empty() {
            out.push_str(" e ");
        }
        out.push_str(TEENS[u]);
        return out;
    }

    if d > 1 {
        if !out.is_empty() {
            out.push_str(" e ");
        }
        out.push_str(TENS[d]);
    }

    if u > 0 {
        if !out.is_empty() {
            out.push_str(" e ");
        }
        out.push_str(UNITS[u]);
    }

    out
}

/// Renders a non-negative monetary amount as Portuguese long-form words,
/// e.g. 1250.50 -> "mil duzentos e cinquenta reais e cinquenta centavos".
///
/// Cents are rounded to the nearest centavo before conversion. Exact
/// multiples of a million take the partitive form ("um milhão de reais").
/// Supported magnitude is anything under one billion; larger integer parts
/// saturate the millions group rather than panicking.
pub fn numero_para_extenso(valor: f64) -> String {
    let v = if valor.is_finite() && valor > 0.0 { valor } else { 0.0 };

    let total_cents = (v * 100.0).round() as u64;
    let mut int_part = total_cents / 100;
    let cents = total_cents % 100;
    let whole = int_part;

    if int_part == 0 && cents == 0 {
        return "zero reais".to_string();
    }

    let mut words = String::new();

    if int_part >= 1_000_000 {
        let millions = int_part / 1_000_000;
        words.push_str(&group_to_words(millions.min(999)));
        words.push_str(if millions == 1 { " milhão" } else { " milhões" });
        int_part %= 1_000_000;
        if int_part > 0 {
            words.push_str(" e ");
        }
    }

    if int_part >= 1_000 {
        let thousands = int_part / 1_000;
        if thousands == 1 {
            // "mil", never "um mil"
            words.push_str("mil");
        } else {
            words.push_str(&group_to_words(thousands));
            words.push_str(" mil");
        }
        int_part %= 1_000;
        if int_part > 0 {
            words.push_str(" e ");
        }
    }

    if int_part > 0 {
        words.push_str(&group_to_words(int_part));
    }

    if whole > 0 {
        if whole >= 1_000_000 && whole % 1_000_000 == 0 {
            words.push_str(" de");
        }
        words.push_str(if whole == 1 { " real" } else { " reais" });
    }

    if cents > 0 {
        if whole > 0 {
            words.push_str(" e ");
        }
        words.push_str(&group_to_words(cents));
        words.push_str(if cents == 1 { " centavo" } else { " centavos" });
    }

    words.trim().to_string()
}
