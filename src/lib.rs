use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::io::Cursor;
use std::io::Write as _;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use time::{format_description::well_known::Rfc3339, Date, Month, OffsetDateTime};
use uuid::Uuid;

pub mod auth;
pub mod extenso;

pub use extenso::numero_para_extenso;

// ---------------------------------------------------------------------------
// Dates and locale helpers
// ---------------------------------------------------------------------------

pub const MONTH_NAMES: [&str; 12] = [
    "Janeiro",
    "Fevereiro",
    "Março",
    "Abril",
    "Maio",
    "Junho",
    "Julho",
    "Agosto",
    "Setembro",
    "Outubro",
    "Novembro",
    "Dezembro",
];

pub const UNKNOWN_MONTH: &str = "Desconhecido";

pub fn now_iso() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

pub fn today() -> Date {
    OffsetDateTime::now_utc().date()
}

pub fn today_ymd() -> String {
    let d = today();
    format!("{:04}-{:02}-{:02}", d.year(), u8::from(d.month()), d.day())
}

/// Current reference month as `YYYY-MM`.
pub fn current_month_year() -> String {
    let d = today();
    format!("{:04}-{:02}", d.year(), u8::from(d.month()))
}

/// Parses a persisted `YYYY-MM-DD` date. Anything malformed yields `None`.
pub fn parse_ymd(s: &str) -> Option<Date> {
    let mut it = s.trim().splitn(3, '-');
    let y: i32 = it.next()?.parse().ok()?;
    let m: u8 = it.next()?.parse().ok()?;
    let d: u8 = it.next()?.parse().ok()?;
    let month = Month::try_from(m).ok()?;
    Date::from_calendar_date(y, month, d).ok()
}

fn parse_reference_month(s: &str) -> Result<(i32, Month), String> {
    let mut it = s.trim().splitn(2, '-');
    let y = it
        .next()
        .and_then(|t| t.parse::<i32>().ok())
        .ok_or_else(|| format!("invalid reference month: {s:?}"))?;
    let m = it
        .next()
        .and_then(|t| t.parse::<u8>().ok())
        .and_then(|n| Month::try_from(n).ok())
        .ok_or_else(|| format!("invalid reference month: {s:?}"))?;
    Ok((y, m))
}

/// Formats an ISO date or datetime as `DD/MM/YYYY`. Unparseable input is
/// returned trimmed, so a bad stored value still shows up on the document.
pub fn format_date_br(s: &str) -> String {
    let t = s.trim();
    if t.is_empty() {
        return String::new();
    }
    // byte slicing would panic on a multibyte char straddling the cut
    let head = t.get(..10).unwrap_or(t);
    match parse_ymd(head) {
        Some(d) => format!("{:02}/{:02}/{:04}", d.day(), u8::from(d.month()), d.year()),
        None => t.to_string(),
    }
}

/// `"2025-03"` -> `"março de 2025"`.
pub fn format_month_year(reference: &str) -> String {
    match parse_reference_month(reference) {
        Ok((y, m)) => {
            let name = MONTH_NAMES[u8::from(m) as usize - 1].to_lowercase();
            format!("{name} de {y}")
        }
        Err(_) => reference.trim().to_string(),
    }
}

/// Resolves the calendar-month index (0-11) of a reference-month string.
///
/// Accepted encodings, in order: an embedded pt-BR month name, a
/// `YYYY-MM`/`YYYY/MM` pair, a `MM-YYYY`/`MM/YYYY` pair. None of them
/// matching means the record can only be charted under an "unknown" bucket.
pub fn reference_month_index(reference: &str) -> Option<usize> {
    let lower = reference.to_lowercase();
    for (i, name) in MONTH_NAMES.iter().enumerate() {
        if lower.contains(&name.to_lowercase()) {
            return Some(i);
        }
    }

    let parts: Vec<&str> = reference
        .split(|c| c == '-' || c == '/')
        .map(str::trim)
        .collect();

    for w in parts.windows(2) {
        let (a, b) = (w[0], w[1]);
        if a.len() == 4 && a.chars().all(|c| c.is_ascii_digit()) && b.len() <= 2 {
            if let Ok(m) = b.parse::<usize>() {
                if (1..=12).contains(&m) {
                    return Some(m - 1);
                }
            }
        }
    }

    for w in parts.windows(2) {
        let (a, b) = (w[0], w[1]);
        if b.len() == 4 && b.chars().all(|c| c.is_ascii_digit()) && a.len() <= 2 {
            if let Ok(m) = a.parse::<usize>() {
                if (1..=12).contains(&m) {
                    return Some(m - 1);
                }
            }
        }
    }

    None
}

// ---------------------------------------------------------------------------
// Monetary and document-mask formatting
// ---------------------------------------------------------------------------

/// Brazilian currency convention: `R$ 1.234,56`. Non-finite input renders
/// as zero rather than leaking `NaN` into documents.
pub fn format_currency(v: f64) -> String {
    let v = if v.is_finite() { v } else { 0.0 };
    let s = format!("{:.2}", v);
    let parts = s.split('.').collect::<Vec<_>>();
    let int_part = parts[0];
    let dec_part = parts.get(1).copied().unwrap_or("00");

    let mut out = String::new();
    let chars: Vec<char> = int_part.chars().collect();
    let mut cnt = 0;
    for i in (0..chars.len()).rev() {
        if cnt == 3 && chars[i] != '-' {
            out.push('.');
            cnt = 0;
        }
        out.push(chars[i]);
        cnt += 1;
    }
    let int_with_sep: String = out.chars().rev().collect();
    format!("R$ {},{}", int_with_sep, dec_part)
}

fn digits_only(value: &str, max: usize) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).take(max).collect()
}

/// `12345678000190` -> `12.345.678/0001-90`; partial input yields a partial
/// mask, extra characters are dropped.
pub fn format_cnpj(value: &str) -> String {
    let digits = digits_only(value, 14);
    let mut out = String::new();
    for (i, ch) in digits.chars().enumerate() {
        match i {
            2 | 5 => out.push('.'),
            8 => out.push('/'),
            12 => out.push('-'),
            _ => {}
        }
        out.push(ch);
    }
    out
}

/// `11987654321` -> `(11) 98765-4321`; short inputs stay unmasked.
pub fn format_phone(value: &str) -> String {
    let digits = digits_only(value, 11);
    if digits.len() <= 2 {
        return digits;
    }
    let mut out = String::new();
    for (i, ch) in digits.chars().enumerate() {
        if i == 0 {
            out.push('(');
        }
        if i == 2 {
            out.push_str(") ");
        }
        if i == 7 {
            out.push('-');
        }
        out.push(ch);
    }
    out
}

/// `15043060` -> `15043-060`.
pub fn format_cep(value: &str) -> String {
    let digits = digits_only(value, 8);
    if digits.len() <= 5 {
        return digits;
    }
    let mut out = String::new();
    for (i, ch) in digits.chars().enumerate() {
        if i == 5 {
            out.push('-');
        }
        out.push(ch);
    }
    out
}

/// Two-pass weighted mod-11 checksum over the 12 base digits, verifying both
/// check digits. All-identical-digit strings are rejected outright.
pub fn validate_cnpj(cnpj: &str) -> bool {
    let digits: Vec<u32> = cnpj.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() != 14 {
        return false;
    }
    if digits.iter().all(|&d| d == digits[0]) {
        return false;
    }

    let check_digit = |len: usize| -> u32 {
        let mut pos: i32 = len as i32 - 7;
        let mut sum: u32 = 0;
        for &d in digits.iter().take(len) {
            sum += d * pos as u32;
            pos -= 1;
            if pos < 2 {
                pos = 9;
            }
        }
        let rem = sum % 11;
        if rem < 2 {
            0
        } else {
            11 - rem
        }
    };

    check_digit(12) == digits[12] && check_digit(13) == digits[13]
}

pub fn validate_email(email: &str) -> bool {
    let t = email.trim();
    if t.chars().any(char::is_whitespace) {
        return false;
    }
    let mut it = t.splitn(2, '@');
    let local = it.next().unwrap_or("");
    let domain = it.next().unwrap_or("");
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

fn sanitize_filename(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        let ok = ch.is_alphanumeric() || ch == '-' || ch == '_' || ch == '.' || ch == ' ';
        out.push(if ok { ch } else { '_' });
    }
    let trimmed = out.trim().to_string();
    if trimmed.is_empty() {
        "documento".to_string()
    } else {
        trimmed
    }
}

// ---------------------------------------------------------------------------
// Domain model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentNote {
    #[serde(default)]
    pub delivered: bool,
    #[serde(default)]
    pub received_on: Option<String>,
    #[serde(default)]
    pub notes: String,
}

impl Default for DocumentNote {
    fn default() -> Self {
        Self {
            delivered: false,
            received_on: None,
            notes: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialBalanceDoc {
    #[serde(default)]
    pub delivered: bool,
    #[serde(default)]
    pub received_on: Option<String>,
    #[serde(default)]
    pub total_assets: f64,
    #[serde(default)]
    pub total_liabilities: f64,
}

impl Default for TrialBalanceDoc {
    fn default() -> Self {
        Self {
            delivered: false,
            received_on: None,
            total_assets: 0.0,
            total_liabilities: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnualBalanceDoc {
    #[serde(default)]
    pub delivered: bool,
    #[serde(default)]
    pub received_on: Option<String>,
    #[serde(default)]
    pub profit_or_loss: f64,
    #[serde(default = "default_reference_year")]
    pub reference_year: i32,
}

fn default_reference_year() -> i32 {
    today().year()
}

impl Default for AnnualBalanceDoc {
    fn default() -> Self {
        Self {
            delivered: false,
            received_on: None,
            profit_or_loss: 0.0,
            reference_year: default_reference_year(),
        }
    }
}

/// The fixed set of compliance documents tracked per client. Field names
/// keep the Brazilian legal terms; the shapes differ per document kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Documentation {
    #[serde(default)]
    pub contrato_social: DocumentNote,
    #[serde(default)]
    pub balancete: TrialBalanceDoc,
    #[serde(default)]
    pub balanco_anual: AnnualBalanceDoc,
    #[serde(default)]
    pub livros_entradas_saidas: DocumentNote,
}

impl Documentation {
    pub fn delivered_count(&self) -> usize {
        [
            self.contrato_social.delivered,
            self.balancete.delivered,
            self.balanco_anual.delivered,
            self.livros_entradas_saidas.delivered,
        ]
        .iter()
        .filter(|d| **d)
        .count()
    }

    /// Kind-specific fields only carry data while the document is marked as
    /// delivered; unchecking resets them to defaults.
    pub fn normalized(mut self) -> Self {
        if !self.contrato_social.delivered {
            self.contrato_social = DocumentNote::default();
        }
        if !self.balancete.delivered {
            self.balancete = TrialBalanceDoc::default();
        }
        if !self.balanco_anual.delivered {
            self.balanco_anual = AnnualBalanceDoc::default();
        }
        if !self.livros_entradas_saidas.delivered {
            self.livros_entradas_saidas = DocumentNote::default();
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentationStatus {
    None,
    Partial,
    Complete,
}

/// Three-state completeness indicator over the four tracked documents.
/// Absent documentation counts as nothing delivered.
pub fn documentation_status(documentation: Option<&Documentation>) -> DocumentationStatus {
    let Some(doc) = documentation else {
        return DocumentationStatus::None;
    };
    match doc.delivered_count() {
        0 => DocumentationStatus::None,
        4 => DocumentationStatus::Complete,
        _ => DocumentationStatus::Partial,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: String,
    pub name: String,
    pub cnpj: String,
    #[serde(default)]
    pub cnpj_card: String,
    #[serde(default)]
    pub state_registration: String,
    #[serde(default)]
    pub municipal_registration: String,
    #[serde(default)]
    pub accounting_start_date: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub cep: String,
    #[serde(default)]
    pub phone: String,
    pub email: String,
    pub monthly_fee: f64,
    pub due_day: u8,
    pub active: bool,
    #[serde(default)]
    pub documentation: Option<Documentation>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewClient {
    pub name: String,
    pub cnpj: String,
    #[serde(default)]
    pub cnpj_card: String,
    #[serde(default)]
    pub state_registration: String,
    #[serde(default)]
    pub municipal_registration: String,
    #[serde(default)]
    pub accounting_start_date: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub cep: String,
    #[serde(default)]
    pub phone: String,
    pub email: String,
    pub monthly_fee: f64,
    #[serde(default = "default_due_day")]
    pub due_day: u8,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub documentation: Option<Documentation>,
}

fn default_due_day() -> u8 {
    10
}

fn default_true() -> bool {
    true
}

/// Per-field validation of a client form. Returns every failing message
/// (field-tagged) so the shell can surface them inline; an empty vec means
/// the input may be saved.
pub fn validate_client(input: &NewClient) -> Vec<String> {
    let mut errors = Vec::new();

    if input.name.trim().is_empty() {
        errors.push("name: obrigatório".to_string());
    }
    if input.cnpj.trim().is_empty() {
        errors.push("cnpj: obrigatório".to_string());
    } else if !validate_cnpj(&input.cnpj) {
        errors.push("cnpj: inválido".to_string());
    }
    if input.cnpj_card.trim().is_empty() {
        errors.push("cnpjCard: obrigatório".to_string());
    }
    if input.state_registration.trim().is_empty() {
        errors.push("stateRegistration: obrigatória".to_string());
    }
    if input.municipal_registration.trim().is_empty() {
        errors.push("municipalRegistration: obrigatória".to_string());
    }
    match parse_ymd(&input.accounting_start_date) {
        None => errors.push("accountingStartDate: obrigatória".to_string()),
        Some(d) => {
            if d > today() {
                errors.push("accountingStartDate: não pode ser futura".to_string());
            }
        }
    }
    if input.email.trim().is_empty() {
        errors.push("email: obrigatório".to_string());
    } else if !validate_email(&input.email) {
        errors.push("email: inválido".to_string());
    }
    if !(input.monthly_fee > 0.0) {
        errors.push("monthlyFee: deve ser maior que zero".to_string());
    }
    if !(1..=31).contains(&input.due_day) {
        errors.push("dueDay: deve estar entre 1 e 31".to_string());
    }

    if let Some(doc) = &input.documentation {
        if doc.contrato_social.delivered && doc.contrato_social.received_on.is_none() {
            errors.push("documentation.contratoSocial: data obrigatória se entregue".to_string());
        }
        if doc.balancete.delivered && doc.balancete.received_on.is_none() {
            errors.push("documentation.balancete: data obrigatória se entregue".to_string());
        }
        if doc.balanco_anual.delivered {
            if doc.balanco_anual.received_on.is_none() {
                errors.push("documentation.balancoAnual: data obrigatória se entregue".to_string());
            }
            if !(2000..=2100).contains(&doc.balanco_anual.reference_year) {
                errors.push("documentation.balancoAnual: ano inválido (2000-2100)".to_string());
            }
        }
        if doc.livros_entradas_saidas.delivered && doc.livros_entradas_saidas.received_on.is_none()
        {
            errors.push(
                "documentation.livrosEntradasSaidas: data obrigatória se entregue".to_string(),
            );
        }
    }

    errors
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingStatus {
    Pending,
    Paid,
}

impl BillingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingStatus::Pending => "PENDING",
            BillingStatus::Paid => "PAID",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtraService {
    pub description: String,
    pub amount: f64,
    pub date: String,
}

/// A monthly billing record ("honorário") for one client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingRecord {
    pub id: String,
    pub client_id: String,
    /// `YYYY-MM`, the month the fee covers (distinct from the due date).
    pub reference_month: String,
    pub base_fee: f64,
    #[serde(default)]
    pub extra_services: Vec<ExtraService>,
    pub total: f64,
    pub due_date: String,
    pub status: BillingStatus,
    #[serde(default)]
    pub payment_date: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub sent_via_whatsapp: bool,
    pub created_at: String,
}

// ---------------------------------------------------------------------------
// Billing aggregation engine
// ---------------------------------------------------------------------------

/// The single place the total is derived. Every extras mutation path must
/// run through this so `total == base_fee + sum(extras)` can never go stale.
pub fn recompute_total(record: &mut BillingRecord) {
    record.total = record.base_fee + record.extra_services.iter().map(|s| s.amount).sum::<f64>();
}

/// `status=Paid` and a set payment date travel together; applied on every
/// write path, mirroring the stored-record invariant.
fn enforce_payment_invariant(record: &mut BillingRecord, today_ymd: &str) {
    match record.status {
        BillingStatus::Paid => {
            if record.payment_date.is_none() {
                record.payment_date = Some(today_ymd.to_string());
            }
        }
        BillingStatus::Pending => {
            record.payment_date = None;
        }
    }
}

/// Due date for a reference month: the client's due day, clamped to the last
/// day of that month (a due day of 31 lands on Feb 28/29, not in March).
pub fn due_date_for(reference_month: &str, due_day: u8) -> Result<String, String> {
    let (year, month) = parse_reference_month(reference_month)?;
    let last = time::util::days_in_year_month(year, month);
    let day = due_day.clamp(1, last);
    let date = Date::from_calendar_date(year, month, day).map_err(|e| e.to_string())?;
    Ok(format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    ))
}

/// Synthesizes pending records for every active client that has none for
/// `reference_month`. Idempotent by (client id, month): running it again
/// returns an empty vec, which callers report as a no-op rather than an
/// error.
pub fn generate_month_records(
    clients: &[Client],
    existing: &[BillingRecord],
    reference_month: &str,
) -> Result<Vec<BillingRecord>, String> {
    parse_reference_month(reference_month)?;

    let billed: Vec<&str> = existing
        .iter()
        .filter(|r| r.reference_month == reference_month)
        .map(|r| r.client_id.as_str())
        .collect();

    let mut created = Vec::new();
    for client in clients.iter().filter(|c| c.active) {
        if billed.contains(&client.id.as_str()) {
            continue;
        }
        let mut record = BillingRecord {
            id: Uuid::new_v4().to_string(),
            client_id: client.id.clone(),
            reference_month: reference_month.to_string(),
            base_fee: client.monthly_fee,
            extra_services: Vec::new(),
            total: 0.0,
            due_date: due_date_for(reference_month, client.due_day)?,
            status: BillingStatus::Pending,
            payment_date: None,
            payment_method: None,
            notes: String::new(),
            sent_via_whatsapp: false,
            created_at: now_iso(),
        };
        recompute_total(&mut record);
        created.push(record);
    }
    Ok(created)
}

/// Overdue is derived, never stored: pending, unpaid and strictly past the
/// due date (date-only comparison).
pub fn is_overdue(record: &BillingRecord, today: Date) -> bool {
    record.status == BillingStatus::Pending
        && record.payment_date.is_none()
        && parse_ymd(&record.due_date).map(|d| d < today).unwrap_or(false)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyStats {
    pub forecast: f64,
    pub received: f64,
    pub pending: f64,
    pub overdue: f64,
}

/// Dashboard numbers for one reference month. Each record lands in exactly
/// one of received/pending/overdue, so `forecast` always equals their sum.
pub fn monthly_stats(records: &[BillingRecord], reference_month: &str, today: Date) -> MonthlyStats {
    let mut stats = MonthlyStats::default();
    for r in records.iter().filter(|r| r.reference_month == reference_month) {
        stats.forecast += r.total;
        match r.status {
            BillingStatus::Paid => stats.received += r.total,
            BillingStatus::Pending => {
                if is_overdue(r, today) {
                    stats.overdue += r.total;
                } else {
                    stats.pending += r.total;
                }
            }
        }
    }
    stats
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthBucket {
    pub month: String,
    pub forecast: f64,
    pub received: f64,
    pub pending: f64,
}

/// Chart series for one selected year: always the full 12 calendar months in
/// order, zero-valued where no records exist, plus a trailing "Desconhecido"
/// bucket only when some record's month encoding cannot be resolved.
pub fn yearly_series(records: &[BillingRecord], year: &str) -> Vec<MonthBucket> {
    let mut buckets: Vec<MonthBucket> = MONTH_NAMES
        .iter()
        .map(|m| MonthBucket {
            month: (*m).to_string(),
            forecast: 0.0,
            received: 0.0,
            pending: 0.0,
        })
        .collect();
    let mut unknown: Option<MonthBucket> = None;

    for r in records.iter().filter(|r| r.reference_month.contains(year)) {
        let bucket = match reference_month_index(&r.reference_month) {
            Some(i) => &mut buckets[i],
            None => unknown.get_or_insert_with(|| MonthBucket {
                month: UNKNOWN_MONTH.to_string(),
                forecast: 0.0,
                received: 0.0,
                pending: 0.0,
            }),
        };
        bucket.forecast += r.total;
        match r.status {
            BillingStatus::Paid => bucket.received += r.total,
            BillingStatus::Pending => bucket.pending += r.total,
        }
    }

    if let Some(u) = unknown {
        buckets.push(u);
    }
    buckets
}

/// Listing filter used by the shell: all criteria are optional and ANDed.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub reference_month: Option<String>,
    pub client_id: Option<String>,
    pub status: Option<BillingStatus>,
}

impl RecordFilter {
    pub fn for_month(reference_month: &str) -> Self {
        Self {
            reference_month: Some(reference_month.to_string()),
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &BillingRecord) -> bool {
        if let Some(m) = &self.reference_month {
            if &record.reference_month != m {
                return false;
            }
        }
        if let Some(c) = &self.client_id {
            if &record.client_id != c {
                return false;
            }
        }
        if let Some(s) = &self.status {
            if &record.status != s {
                return false;
            }
        }
        true
    }
}

fn validate_extra_service(extra: &ExtraService) -> Result<(), String> {
    if extra.description.trim().is_empty() {
        return Err("extra service: descrição obrigatória".to_string());
    }
    if !(extra.amount > 0.0) {
        return Err("extra service: valor deve ser maior que zero".to_string());
    }
    if parse_ymd(&extra.date).is_none() {
        return Err("extra service: data inválida".to_string());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Issuer identity printed on invoice headers.
    #[serde(default)]
    pub firm_name: String,
    #[serde(default)]
    pub firm_cnpj: String,
    #[serde(default)]
    pub address_line: String,
    #[serde(default)]
    pub district: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub cep: String,
    #[serde(default)]
    pub phone: String,
    /// PIX payment block on the invoice.
    #[serde(default)]
    pub pix_key: String,
    #[serde(default)]
    pub pix_holder: String,
    /// Logo/QR sources: a `data:` URL, an `http(s)` URL or a local path.
    #[serde(default)]
    pub logo_url: String,
    #[serde(default)]
    pub qr_code_url: String,
    #[serde(default = "default_asset_timeout_secs")]
    pub asset_timeout_secs: u64,
}

fn default_asset_timeout_secs() -> u64 {
    5
}

pub fn default_settings() -> Settings {
    Settings {
        firm_name: String::new(),
        firm_cnpj: String::new(),
        address_line: String::new(),
        district: String::new(),
        city: String::new(),
        cep: String::new(),
        phone: String::new(),
        pix_key: String::new(),
        pix_holder: String::new(),
        logo_url: String::new(),
        qr_code_url: String::new(),
        asset_timeout_secs: default_asset_timeout_secs(),
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub firm_name: Option<String>,
    pub firm_cnpj: Option<String>,
    pub address_line: Option<String>,
    pub district: Option<String>,
    pub city: Option<String>,
    pub cep: Option<String>,
    pub phone: Option<String>,
    pub pix_key: Option<String>,
    pub pix_holder: Option<String>,
    pub logo_url: Option<String>,
    pub qr_code_url: Option<String>,
    pub asset_timeout_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Persistence facade
// ---------------------------------------------------------------------------

const CLIENTS_KEY: &str = "clients";
const BILLING_KEY: &str = "billing_records";
const BILLING_BACKUP_KEY: &str = "billing_records_backup";
const SETTINGS_KEY: &str = "settings";

fn sqlite_error_string(err: &rusqlite::Error) -> String {
    match err {
        rusqlite::Error::SqliteFailure(code, msg) => {
            let message = msg.clone().unwrap_or_default();
            format!(
                "sqlite(code={:?}, extended_code={}, msg={})",
                code.code, code.extended_code, message
            )
        }
        other => other.to_string(),
    }
}

fn configure_sqlite(conn: &Connection) -> Result<(), rusqlite::Error> {
    // Apply PRAGMAs on init (outside any transaction).
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;\n\
         PRAGMA synchronous = NORMAL;\n\
         PRAGMA temp_store = MEMORY;\n\
         PRAGMA busy_timeout = 5000;\n",
    )?;
    conn.busy_timeout(Duration::from_millis(5000))?;
    Ok(())
}

fn init_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS kv (\n\
            key TEXT PRIMARY KEY NOT NULL,\n\
            value TEXT NOT NULL,\n\
            updatedAt TEXT NOT NULL\n\
        );",
    )?;
    Ok(())
}

/// Durable key/value store over a single local database file. Collections
/// are stored as whole-snapshot JSON payloads under fixed keys; there is no
/// partial write and no cross-handle coordination, so two handles doing
/// read-modify-write against the same store race last-writer-wins.
#[derive(Clone)]
pub struct KvStore {
    conn: Arc<Mutex<Connection>>,
}

impl KvStore {
    pub fn open(path: &Path) -> Result<Self, String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        let conn = Connection::open(path).map_err(|e| e.to_string())?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, String> {
        let conn = Connection::open_in_memory().map_err(|e| e.to_string())?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, String> {
        configure_sqlite(&conn).map_err(|e| e.to_string())?;
        init_schema(&conn).map_err(|e| e.to_string())?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<T, F>(&self, op_name: &'static str, f: F) -> Result<T, String>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    {
        let guard = self.conn.lock().map_err(|_| "db mutex poisoned".to_string())?;
        f(&guard).map_err(|e| {
            let msg = sqlite_error_string(&e);
            eprintln!("[sqlite] {{ op: {:?}, error: {:?} }}", op_name, msg);
            msg
        })
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, String> {
        let key = key.to_string();
        self.with_conn("kv_get", move |conn| {
            conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |r| {
                r.get(0)
            })
            .optional()
        })
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), String> {
        let (key, value, now) = (key.to_string(), value.to_string(), now_iso());
        self.with_conn("kv_set", move |conn| {
            conn.execute(
                "INSERT INTO kv(key, value, updatedAt) VALUES(?1, ?2, ?3)\n\
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updatedAt = excluded.updatedAt",
                params![key, value, now],
            )?;
            Ok(())
        })
    }

    pub fn remove(&self, key: &str) -> Result<(), String> {
        let key = key.to_string();
        self.with_conn("kv_remove", move |conn| {
            conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
            Ok(())
        })
    }
}

/// Corrupt or missing payloads degrade to an empty collection: a broken
/// store should surface as "no data", never as a crash.
fn decode_collection<T: DeserializeOwned>(key: &str, payload: Option<String>) -> Vec<T> {
    let Some(raw) = payload else {
        return Vec::new();
    };
    match serde_json::from_str::<Vec<T>>(&raw) {
        Ok(items) => items,
        Err(e) => {
            eprintln!("[storage] {{ key: {:?}, error: {:?} }}", key, e.to_string());
            Vec::new()
        }
    }
}

fn encode_collection<T: Serialize>(items: &[T]) -> Result<String, String> {
    serde_json::to_string(items).map_err(|e| e.to_string())
}

#[derive(Clone)]
pub struct ClientRepository {
    store: KvStore,
}

impl ClientRepository {
    pub fn new(store: KvStore) -> Self {
        Self { store }
    }

    pub fn list(&self) -> Vec<Client> {
        match self.store.get(CLIENTS_KEY) {
            Ok(payload) => decode_collection(CLIENTS_KEY, payload),
            Err(_) => Vec::new(),
        }
    }

    pub fn save(&self, clients: &[Client]) -> Result<(), String> {
        self.store.set(CLIENTS_KEY, &encode_collection(clients)?)
    }

    pub fn delete(&self, id: &str) -> Result<bool, String> {
        let mut clients = self.list();
        let before = clients.len();
        clients.retain(|c| c.id != id);
        if clients.len() == before {
            return Ok(false);
        }
        self.save(&clients)?;
        Ok(true)
    }
}

#[derive(Clone)]
pub struct BillingRepository {
    store: KvStore,
}

impl BillingRepository {
    pub fn new(store: KvStore) -> Self {
        Self { store }
    }

    pub fn list(&self) -> Vec<BillingRecord> {
        match self.store.get(BILLING_KEY) {
            Ok(payload) => decode_collection(BILLING_KEY, payload),
            Err(_) => Vec::new(),
        }
    }

    /// Every save also overwrites the backup key with the identical payload.
    /// The backup is a point-in-time mirror of the latest save, not a log.
    pub fn save(&self, records: &[BillingRecord]) -> Result<(), String> {
        let payload = encode_collection(records)?;
        self.store.set(BILLING_KEY, &payload)?;
        self.store.set(BILLING_BACKUP_KEY, &payload)
    }

    pub fn delete(&self, id: &str) -> Result<bool, String> {
        let mut records = self.list();
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            return Ok(false);
        }
        self.save(&records)?;
        Ok(true)
    }
}

#[derive(Clone)]
pub struct SettingsStore {
    store: KvStore,
}

impl SettingsStore {
    pub fn new(store: KvStore) -> Self {
        Self { store }
    }

    pub fn get(&self) -> Settings {
        match self.store.get(SETTINGS_KEY) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                eprintln!(
                    "[storage] {{ key: {:?}, error: {:?} }}",
                    SETTINGS_KEY,
                    e.to_string()
                );
                default_settings()
            }),
            _ => default_settings(),
        }
    }

    pub fn update(&self, patch: SettingsPatch) -> Result<Settings, String> {
        let mut s = self.get();
        if let Some(v) = patch.firm_name {
            s.firm_name = v;
        }
        if let Some(v) = patch.firm_cnpj {
            s.firm_cnpj = v;
        }
        if let Some(v) = patch.address_line {
            s.address_line = v;
        }
        if let Some(v) = patch.district {
            s.district = v;
        }
        if let Some(v) = patch.city {
            s.city = v;
        }
        if let Some(v) = patch.cep {
            s.cep = v;
        }
        if let Some(v) = patch.phone {
            s.phone = v;
        }
        if let Some(v) = patch.pix_key {
            s.pix_key = v;
        }
        if let Some(v) = patch.pix_holder {
            s.pix_holder = v;
        }
        if let Some(v) = patch.logo_url {
            s.logo_url = v;
        }
        if let Some(v) = patch.qr_code_url {
            s.qr_code_url = v;
        }
        if let Some(v) = patch.asset_timeout_secs {
            s.asset_timeout_secs = v;
        }
        let raw = serde_json::to_string(&s).map_err(|e| e.to_string())?;
        self.store.set(SETTINGS_KEY, &raw)?;
        Ok(s)
    }
}

// ---------------------------------------------------------------------------
// Messaging hand-off
// ---------------------------------------------------------------------------

fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len() * 3);
    for b in input.as_bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(*b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

/// Templated receipt message for the WhatsApp hand-off.
pub fn whatsapp_message(record: &BillingRecord, client: &Client) -> String {
    format!(
        "Olá {}, segue o recibo do seu honorário referente a {}.\n\
         Valor total: {} 💼📄\n\
         Obrigado pela parceria!",
        client.name,
        format_month_year(&record.reference_month),
        format_currency(record.total),
    )
}

/// Builds the `wa.me` deep link. Delivery is fully delegated to the external
/// messaging app; the core can only record that the hand-off happened.
pub fn whatsapp_link(record: &BillingRecord, client: &Client) -> Result<String, String> {
    let phone = digits_only(&client.phone, 11);
    if phone.is_empty() {
        return Err("client has no WhatsApp phone number".to_string());
    }
    let message = whatsapp_message(record, client);
    Ok(format!("https://wa.me/55{}?text={}", phone, percent_encode(&message)))
}

// ---------------------------------------------------------------------------
// CSV export
// ---------------------------------------------------------------------------

fn csv_escape_field(input: &str) -> String {
    let needs_quotes =
        input.contains(',') || input.contains('"') || input.contains('\n') || input.contains('\r');
    if !needs_quotes {
        return input.to_string();
    }
    let escaped = input.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

fn csv_join_row(fields: &[String]) -> String {
    let mut out = String::new();
    for (i, f) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&csv_escape_field(f));
    }
    out
}

fn format_money_csv(v: f64) -> String {
    // Raw decimal, dot separator, deterministic 2 decimals.
    format!("{:.2}", v)
}

/// One row per billing record; unresolved client ids render with an empty
/// client column instead of dropping the row (the money is still owed).
pub fn render_billing_csv(records: &[BillingRecord], clients: &[Client]) -> String {
    let mut out = String::new();
    out.push_str(&csv_join_row(&[
        "client".to_string(),
        "referenceMonth".to_string(),
        "baseFee".to_string(),
        "extras".to_string(),
        "total".to_string(),
        "status".to_string(),
        "dueDate".to_string(),
        "paymentDate".to_string(),
    ]));
    out.push('\n');

    for r in records {
        let client_name = clients
            .iter()
            .find(|c| c.id == r.client_id)
            .map(|c| c.name.clone())
            .unwrap_or_default();
        let extras: f64 = r.extra_services.iter().map(|s| s.amount).fold(0.0, |a, b| a + b);
        out.push_str(&csv_join_row(&[
            client_name,
            r.reference_month.clone(),
            format_money_csv(r.base_fee),
            format_money_csv(extras),
            format_money_csv(r.total),
            r.status.as_str().to_string(),
            r.due_date.clone(),
            r.payment_date.clone().unwrap_or_default(),
        ]));
        out.push('\n');
    }
    out
}

// ---------------------------------------------------------------------------
// Invoice rendering (fixed-coordinate A4 layout)
// ---------------------------------------------------------------------------

fn push_line(
    layer: &printpdf::PdfLayerReference,
    font: &printpdf::IndirectFontRef,
    text: &str,
    font_size: f32,
    x: f32,
    y: f32,
) {
    use printpdf::Mm;
    layer.use_text(text, font_size, Mm(x), Mm(y), font);
}

fn push_line_right(
    layer: &printpdf::PdfLayerReference,
    font: &printpdf::IndirectFontRef,
    text: &str,
    font_size: f32,
    x_right: f32,
    y: f32,
) {
    // printpdf doesn't expose reliable text metrics for built-in fonts; use a
    // pragmatic estimate. Good enough for numeric columns.
    let width_est = (text.chars().count() as f32) * font_size * 0.42;
    let x = (x_right - width_est).max(0.0);
    push_line(layer, font, text, font_size, x, y);
}

fn push_line_centered(
    layer: &printpdf::PdfLayerReference,
    font: &printpdf::IndirectFontRef,
    text: &str,
    font_size: f32,
    x_center: f32,
    y: f32,
) {
    let width_est = (text.chars().count() as f32) * font_size * 0.42;
    let x = (x_center - width_est / 2.0).max(0.0);
    push_line(layer, font, text, font_size, x, y);
}

fn draw_rule(layer: &printpdf::PdfLayerReference, x1: f32, x2: f32, y: f32) {
    use printpdf::Mm;
    layer.add_line(printpdf::Line {
        points: vec![
            (printpdf::Point::new(Mm(x1), Mm(y)), false),
            (printpdf::Point::new(Mm(x2), Mm(y)), false),
        ],
        is_closed: false,
    });
}

fn stroke_rect(layer: &printpdf::PdfLayerReference, x: f32, y_top: f32, w: f32, h: f32) {
    use printpdf::{path::PaintMode, Mm, Rect};
    let rect =
        Rect::new(Mm(x), Mm(y_top - h), Mm(x + w), Mm(y_top)).with_mode(PaintMode::Stroke);
    layer.add_rect(rect);
}

fn fill_rect_gray(
    layer: &printpdf::PdfLayerReference,
    x: f32,
    y_top: f32,
    w: f32,
    h: f32,
    gray: f32,
) {
    use printpdf::{path::PaintMode, Color, Mm, Rect, Rgb};

    layer.set_fill_color(Color::Rgb(Rgb::new(gray, gray, gray, None)));
    // printpdf uses bottom-left origin; our y coordinates are already in that space.
    let rect = Rect::new(Mm(x), Mm(y_top - h), Mm(x + w), Mm(y_top)).with_mode(PaintMode::Fill);
    layer.add_rect(rect);
    // reset fill to black
    layer.set_fill_color(Color::Rgb(Rgb::new(0.0, 0.0, 0.0, None)));
}

fn set_outline_gray(layer: &printpdf::PdfLayerReference, gray: f32) {
    use printpdf::{Color, Rgb};
    layer.set_outline_color(Color::Rgb(Rgb::new(gray, gray, gray, None)));
}

/// Loads a logo/QR asset from a `data:` URL, an `http(s)` URL (with an
/// explicit timeout) or a local file path.
fn load_asset_image(
    source: &str,
    timeout: Duration,
) -> Result<printpdf::image_crate::DynamicImage, String> {
    use base64::Engine as _;

    let s = source.trim();
    if s.is_empty() {
        return Err("empty asset source".to_string());
    }

    let bytes: Vec<u8> = if s.to_ascii_lowercase().starts_with("data:") {
        let comma = s.find(',').ok_or_else(|| "malformed data url".to_string())?;
        let (meta, data) = s.split_at(comma);
        if !meta.to_ascii_lowercase().contains(";base64") {
            return Err("data url is not base64".to_string());
        }
        base64::engine::general_purpose::STANDARD
            .decode(data[1..].as_bytes())
            .map_err(|e| format!("data url decode failed: {e}"))?
    } else if s.starts_with("http://") || s.starts_with("https://") {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| e.to_string())?;
        let resp = client.get(s).send().map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("asset fetch failed: http {}", resp.status()));
        }
        resp.bytes().map_err(|e| e.to_string())?.to_vec()
    } else {
        std::fs::read(s).map_err(|e| e.to_string())?
    };

    printpdf::image_crate::load_from_memory(&bytes).map_err(|e| e.to_string())
}

fn place_image(
    layer: &printpdf::PdfLayerReference,
    img: &printpdf::image_crate::DynamicImage,
    x: f32,
    y_top: f32,
    target_w_mm: f32,
    target_h_mm: f32,
) {
    use printpdf::{Image, ImageTransform, Mm};

    const DPI: f32 = 300.0;
    let px_w = img.width().max(1) as f32;
    let px_h = img.height().max(1) as f32;
    let natural_w_mm = px_w / DPI * 25.4;
    let natural_h_mm = px_h / DPI * 25.4;

    let scale = (target_w_mm / natural_w_mm.max(0.01))
        .min(target_h_mm / natural_h_mm.max(0.01))
        .max(0.01);
    let scaled_h = natural_h_mm * scale;

    let image = Image::from_dynamic_image(img);
    image.add_to_layer(
        layer.clone(),
        ImageTransform {
            translate_x: Some(Mm(x)),
            translate_y: Some(Mm(y_top - scaled_h)),
            rotate: None,
            scale_x: Some(scale),
            scale_y: Some(scale),
            dpi: Some(DPI),
        },
    );
}

/// Invoice sequence number, derived deterministically from the reference
/// month: `2025-03` -> `2025030001`.
pub fn invoice_number_for(record: &BillingRecord) -> String {
    format!("{}0001", record.reference_month.replace('-', ""))
}

pub fn invoice_filename(record: &BillingRecord, client: &Client) -> String {
    sanitize_filename(&format!(
        "Fatura_{}_{}.pdf",
        client.name.trim().replace(char::is_whitespace, "_"),
        record.reference_month
    ))
}

/// Renders one billing record as a fixed-layout A4 invoice. Header box with
/// emission/due-date/sequence number, client block, line-item table (base
/// fee plus one row per extra service), total box paired with the
/// amount-in-words line, and the PIX payment block. Missing logo/QR assets
/// are logged and skipped; they never fail the document.
pub fn generate_invoice_pdf(
    record: &BillingRecord,
    client: &Client,
    settings: &Settings,
) -> Result<Vec<u8>, String> {
    use printpdf::{BuiltinFont, Mm, PdfDocument};

    const PAGE_W: f32 = 210.0;
    const PAGE_H: f32 = 297.0;
    const MARGIN_X: f32 = 20.0;

    let (doc, page1, layer1) = PdfDocument::new("Fatura", Mm(PAGE_W), Mm(PAGE_H), "Layer 1");
    let layer = doc.get_page(page1).get_layer(layer1);

    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| e.to_string())?;
    let font_bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| e.to_string())?;

    let content_right = PAGE_W - MARGIN_X;
    let timeout = Duration::from_secs(settings.asset_timeout_secs.max(1));

    // Header: all coordinates flow top-down; printpdf's origin is bottom-left.
    let top_y = PAGE_H - 15.0;

    match load_asset_image(&settings.logo_url, timeout) {
        Ok(img) => place_image(&layer, &img, MARGIN_X, top_y, 30.0, 30.0),
        Err(e) => eprintln!("[assets] logo unavailable: {e}"),
    }

    // Issuer block, right of the logo.
    let left_text_x = 55.0;
    let mut info_y = top_y - 5.0;
    push_line(&layer, &font_bold, &settings.firm_name, 11.0, left_text_x, info_y);
    info_y -= 6.0;
    push_line(&layer, &font, &settings.address_line, 10.0, left_text_x, info_y);
    info_y -= 5.0;
    push_line(&layer, &font, &settings.district, 10.0, left_text_x, info_y);
    info_y -= 5.0;
    push_line(
        &layer,
        &font,
        &format!("CEP: {} - {}", format_cep(&settings.cep), settings.city),
        10.0,
        left_text_x,
        info_y,
    );
    info_y -= 5.0;
    push_line(
        &layer,
        &font,
        &format!("Telefone: {}", format_phone(&settings.phone)),
        10.0,
        left_text_x,
        info_y,
    );

    // Emission / due date / sequence number box, top right.
    let box_w = 50.0;
    let box_h = 27.0;
    let box_x = PAGE_W - box_w - MARGIN_X;
    let box_top = top_y - 2.0;
    stroke_rect(&layer, box_x, box_top, box_w, box_h);

    let text_x = box_x + 4.0;
    let mut text_y = box_top - 8.0;
    push_line(&layer, &font_bold, "EMISSÃO:", 9.0, text_x, text_y);
    push_line_right(
        &layer,
        &font_bold,
        &format_date_br(&record.created_at),
        9.0,
        box_x + box_w - 5.0,
        text_y,
    );
    text_y -= 7.0;
    push_line(&layer, &font_bold, "VENCIMENTO:", 9.0, text_x, text_y);
    push_line_right(
        &layer,
        &font_bold,
        &format_date_br(&record.due_date),
        9.0,
        box_x + box_w - 5.0,
        text_y,
    );
    text_y -= 7.0;
    push_line(&layer, &font_bold, "NÚMERO:", 9.0, text_x, text_y);
    push_line_right(
        &layer,
        &font_bold,
        &invoice_number_for(record),
        9.0,
        box_x + box_w - 5.0,
        text_y,
    );

    // Separator and title band.
    draw_rule(&layer, MARGIN_X, content_right, PAGE_H - 48.0);
    fill_rect_gray(&layer, MARGIN_X, PAGE_H - 50.0, PAGE_W - 2.0 * MARGIN_X, 10.0, 0.9);
    push_line_centered(&layer, &font_bold, "FATURA", 12.0, PAGE_W / 2.0, PAGE_H - 57.0);

    // Client block.
    let mut y = PAGE_H - 70.0;
    push_line(&layer, &font, &client.name, 10.0, MARGIN_X + 2.0, y);
    y -= 5.0;
    push_line(&layer, &font, &client.address, 10.0, MARGIN_X + 2.0, y);
    y -= 5.0;
    push_line(
        &layer,
        &font,
        &format!("{} - CEP: {}", client.city, format_cep(&client.cep)),
        10.0,
        MARGIN_X + 2.0,
        y,
    );
    y -= 5.0;
    push_line(
        &layer,
        &font,
        &format!("CPF/CNPJ: {}", format_cnpj(&client.cnpj)),
        10.0,
        MARGIN_X + 2.0,
        y,
    );
    y -= 10.0;

    // Line-item table: header, base-fee row, one row per extra service.
    let row_w = PAGE_W - 2.0 * MARGIN_X;
    let col_date_x = PAGE_W - 75.0;
    let col_amount_x = PAGE_W - 35.0;

    stroke_rect(&layer, MARGIN_X, y, row_w, 8.0);
    push_line(&layer, &font_bold, "DESCRIÇÃO", 10.0, MARGIN_X + 2.0, y - 6.0);
    push_line(&layer, &font_bold, "EMISSÃO", 10.0, col_date_x, y - 6.0);
    push_line(&layer, &font_bold, "VALOR", 10.0, col_amount_x, y - 6.0);
    y -= 8.0;

    stroke_rect(&layer, MARGIN_X, y, row_w, 8.0);
    push_line(
        &layer,
        &font,
        &format!(
            "HONORÁRIOS CONTÁBEIS REF: {}",
            format_month_year(&record.reference_month)
        ),
        10.0,
        MARGIN_X + 2.0,
        y - 6.0,
    );
    push_line(&layer, &font, &format_date_br(&record.created_at), 10.0, col_date_x, y - 6.0);
    push_line(&layer, &font, &format_currency(record.base_fee), 10.0, col_amount_x, y - 6.0);
    y -= 8.0;

    if !record.extra_services.is_empty() {
        push_line(&layer, &font_bold, "SERVIÇOS EXTRAS:", 10.0, MARGIN_X + 2.0, y - 6.0);
        y -= 10.0;
        for extra in &record.extra_services {
            stroke_rect(&layer, MARGIN_X, y, row_w, 8.0);
            push_line(
                &layer,
                &font,
                &format!("• {}", extra.description),
                10.0,
                MARGIN_X + 2.0,
                y - 6.0,
            );
            push_line(&layer, &font, &format_date_br(&extra.date), 10.0, col_date_x, y - 6.0);
            push_line(&layer, &font, &format_currency(extra.amount), 10.0, col_amount_x, y - 6.0);
            y -= 8.0;
        }
    }

    // Amount in words plus the boxed total.
    y -= 10.0;
    push_line(&layer, &font, "A importância de:", 10.0, MARGIN_X + 2.0, y);
    let amount_words = numero_para_extenso(record.total).to_uppercase();
    push_line(&layer, &font_bold, &amount_words, 10.0, MARGIN_X + 2.0, y - 5.0);

    stroke_rect(&layer, PAGE_W - 60.0, y + 3.0, 40.0, 15.0);
    push_line_centered(
        &layer,
        &font_bold,
        &format_currency(record.total),
        12.0,
        PAGE_W - 40.0,
        y - 7.0,
    );

    // PIX payment block.
    y -= 30.0;
    set_outline_gray(&layer, 0.78);
    stroke_rect(&layer, MARGIN_X, y, row_w, 60.0);
    set_outline_gray(&layer, 0.0);
    push_line(&layer, &font_bold, "PAGAMENTO VIA PIX", 11.0, MARGIN_X + 5.0, y - 8.0);
    draw_rule(&layer, MARGIN_X + 5.0, PAGE_W - 45.0, y - 10.0);

    match load_asset_image(&settings.qr_code_url, timeout) {
        Ok(img) => place_image(&layer, &img, MARGIN_X + 5.0, y - 15.0, 40.0, 40.0),
        Err(e) => eprintln!("[assets] pix qr code unavailable: {e}"),
    }

    push_line(&layer, &font, "Favorecido:", 10.0, 70.0, y - 20.0);
    push_line(&layer, &font, &settings.pix_holder, 10.0, 95.0, y - 20.0);
    push_line(&layer, &font, "Chave PIX (CNPJ):", 10.0, 70.0, y - 27.0);
    push_line(
        &layer,
        &font_bold,
        &format_cnpj(&settings.pix_key),
        10.0,
        110.0,
        y - 27.0,
    );

    push_line(&layer, &font, "Como pagar:", 9.0, 70.0, y - 35.0);
    push_line(&layer, &font, "1. Abra o app do seu banco", 9.0, 70.0, y - 40.0);
    push_line(&layer, &font, "2. Escolha Pix > Ler QR Code", 9.0, 70.0, y - 45.0);
    push_line(
        &layer,
        &font,
        "3. Aponte a câmera para o código ao lado",
        9.0,
        70.0,
        y - 50.0,
    );
    push_line(
        &layer,
        &font,
        "4. Confirme o valor e finalize o pagamento",
        9.0,
        70.0,
        y - 55.0,
    );

    let mut writer = std::io::BufWriter::new(Vec::<u8>::new());
    doc.save(&mut writer).map_err(|e| e.to_string())?;
    let bytes = writer.into_inner().map_err(|e| e.to_string())?;
    Ok(bytes)
}

/// Batch export: one PDF per record, sequentially, packed into a zip named
/// after the current year-month. Records whose client id no longer resolves
/// are skipped (logged) instead of failing the whole archive.
pub fn generate_batch_zip(
    records: &[BillingRecord],
    clients: &[Client],
    settings: &Settings,
) -> Result<(Vec<u8>, String), String> {
    let mut zw = zip::ZipWriter::new(Cursor::new(Vec::<u8>::new()));
    let options = zip::write::FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for record in records {
        let Some(client) = clients.iter().find(|c| c.id == record.client_id) else {
            eprintln!(
                "[invoice] {{ record: {:?}, error: \"client not found, skipped\" }}",
                record.id
            );
            continue;
        };
        let bytes = generate_invoice_pdf(record, client, settings)?;
        zw.start_file(invoice_filename(record, client), options)
            .map_err(|e| e.to_string())?;
        zw.write_all(&bytes).map_err(|e| e.to_string())?;
    }

    let cursor = zw.finish().map_err(|e| e.to_string())?;
    let name = format!("Honorarios_{}.zip", current_month_year());
    Ok((cursor.into_inner(), name))
}

// ---------------------------------------------------------------------------
// Application facade
// ---------------------------------------------------------------------------

/// The plain-function surface the shell calls into: owns the store, the
/// per-entity repositories and the settings snapshot.
#[derive(Clone)]
pub struct Backoffice {
    pub clients: ClientRepository,
    pub billing: BillingRepository,
    pub settings: SettingsStore,
}

impl Backoffice {
    pub fn open(path: &Path) -> Result<Self, String> {
        Ok(Self::with_store(KvStore::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self, String> {
        Ok(Self::with_store(KvStore::open_in_memory()?))
    }

    pub fn with_store(store: KvStore) -> Self {
        Self {
            clients: ClientRepository::new(store.clone()),
            billing: BillingRepository::new(store.clone()),
            settings: SettingsStore::new(store),
        }
    }

    // ----- client registry -----

    pub fn list_clients(&self) -> Vec<Client> {
        self.clients.list()
    }

    pub fn get_client(&self, id: &str) -> Option<Client> {
        self.clients.list().into_iter().find(|c| c.id == id)
    }

    pub fn search_clients(&self, term: &str) -> Vec<Client> {
        let term = term.trim().to_lowercase();
        let clients = self.clients.list();
        if term.is_empty() {
            return clients;
        }
        clients
            .into_iter()
            .filter(|c| {
                c.name.to_lowercase().contains(&term)
                    || c.cnpj.contains(&term)
                    || c.city.to_lowercase().contains(&term)
            })
            .collect()
    }

    pub fn create_client(&self, input: NewClient) -> Result<Client, String> {
        let errors = validate_client(&input);
        if !errors.is_empty() {
            return Err(errors.join("; "));
        }
        let client = Client {
            id: Uuid::new_v4().to_string(),
            name: input.name,
            cnpj: input.cnpj,
            cnpj_card: input.cnpj_card,
            state_registration: input.state_registration,
            municipal_registration: input.municipal_registration,
            accounting_start_date: input.accounting_start_date,
            address: input.address,
            city: input.city,
            cep: input.cep,
            phone: input.phone,
            email: input.email,
            monthly_fee: input.monthly_fee,
            due_day: input.due_day,
            active: input.active,
            documentation: input.documentation.map(Documentation::normalized),
            created_at: now_iso(),
        };
        let mut clients = self.clients.list();
        clients.push(client.clone());
        self.clients.save(&clients)?;
        Ok(client)
    }

    pub fn update_client(&self, id: &str, input: NewClient) -> Result<Option<Client>, String> {
        let errors = validate_client(&input);
        if !errors.is_empty() {
            return Err(errors.join("; "));
        }
        let mut clients = self.clients.list();
        let Some(pos) = clients.iter().position(|c| c.id == id) else {
            return Ok(None);
        };
        let existing = &clients[pos];
        let updated = Client {
            id: existing.id.clone(),
            created_at: existing.created_at.clone(),
            name: input.name,
            cnpj: input.cnpj,
            cnpj_card: input.cnpj_card,
            state_registration: input.state_registration,
            municipal_registration: input.municipal_registration,
            accounting_start_date: input.accounting_start_date,
            address: input.address,
            city: input.city,
            cep: input.cep,
            phone: input.phone,
            email: input.email,
            monthly_fee: input.monthly_fee,
            due_day: input.due_day,
            active: input.active,
            documentation: input.documentation.map(Documentation::normalized),
        };
        clients[pos] = updated.clone();
        self.clients.save(&clients)?;
        Ok(Some(updated))
    }

    /// Deleting a client does NOT cascade to its billing records; orphans
    /// stay listed and are skipped by rendering. `orphaned_records` exposes
    /// them so the shell can surface the situation.
    pub fn delete_client(&self, id: &str) -> Result<bool, String> {
        self.clients.delete(id)
    }

    pub fn orphaned_records(&self) -> Vec<BillingRecord> {
        let clients = self.clients.list();
        self.billing
            .list()
            .into_iter()
            .filter(|r| !clients.iter().any(|c| c.id == r.client_id))
            .collect()
    }

    // ----- billing -----

    pub fn list_billing(&self) -> Vec<BillingRecord> {
        self.billing.list()
    }

    pub fn filter_records(&self, filter: &RecordFilter) -> Vec<BillingRecord> {
        self.billing
            .list()
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect()
    }

    /// Creates this month's records for every active client that has none
    /// yet. Returns how many were created; zero is a no-op, not an error.
    pub fn generate_month(&self, reference_month: &str) -> Result<usize, String> {
        let clients = self.clients.list();
        let mut records = self.billing.list();
        let created = generate_month_records(&clients, &records, reference_month)?;
        let count = created.len();
        if count == 0 {
            return Ok(0);
        }
        records.extend(created);
        self.billing.save(&records)?;
        Ok(count)
    }

    pub fn delete_billing_record(&self, id: &str) -> Result<bool, String> {
        self.billing.delete(id)
    }

    fn update_record<F>(&self, id: &str, f: F) -> Result<Option<BillingRecord>, String>
    where
        F: FnOnce(&mut BillingRecord) -> Result<(), String>,
    {
        let mut records = self.billing.list();
        let Some(pos) = records.iter().position(|r| r.id == id) else {
            return Ok(None);
        };
        f(&mut records[pos])?;
        recompute_total(&mut records[pos]);
        enforce_payment_invariant(&mut records[pos], &today_ymd());
        let updated = records[pos].clone();
        self.billing.save(&records)?;
        Ok(Some(updated))
    }

    pub fn add_extra_service(
        &self,
        record_id: &str,
        extra: ExtraService,
    ) -> Result<Option<BillingRecord>, String> {
        validate_extra_service(&extra)?;
        self.update_record(record_id, |r| {
            r.extra_services.push(extra);
            Ok(())
        })
    }

    pub fn update_extra_service(
        &self,
        record_id: &str,
        index: usize,
        extra: ExtraService,
    ) -> Result<Option<BillingRecord>, String> {
        validate_extra_service(&extra)?;
        self.update_record(record_id, |r| {
            let slot = r
                .extra_services
                .get_mut(index)
                .ok_or_else(|| format!("extra service index {index} out of range"))?;
            *slot = extra;
            Ok(())
        })
    }

    pub fn remove_extra_service(
        &self,
        record_id: &str,
        index: usize,
    ) -> Result<Option<BillingRecord>, String> {
        self.update_record(record_id, |r| {
            if index >= r.extra_services.len() {
                return Err(format!("extra service index {index} out of range"));
            }
            r.extra_services.remove(index);
            Ok(())
        })
    }

    /// Manual override in both directions; no validation against due date.
    pub fn toggle_paid(&self, record_id: &str) -> Result<Option<BillingRecord>, String> {
        self.update_record(record_id, |r| {
            // the payment date is set/cleared by the write-path invariant
            r.status = match r.status {
                BillingStatus::Pending => BillingStatus::Paid,
                BillingStatus::Paid => BillingStatus::Pending,
            };
            Ok(())
        })
    }

    pub fn set_sent_via_whatsapp(
        &self,
        record_id: &str,
        sent: bool,
    ) -> Result<Option<BillingRecord>, String> {
        self.update_record(record_id, |r| {
            r.sent_via_whatsapp = sent;
            Ok(())
        })
    }

    /// Builds the deep link and marks the record as handed off. The link
    /// still has to be opened by the shell; delivery is never confirmed.
    pub fn whatsapp_handoff(&self, record_id: &str) -> Result<String, String> {
        let records = self.billing.list();
        let record = records
            .iter()
            .find(|r| r.id == record_id)
            .ok_or_else(|| format!("billing record {record_id} not found"))?;
        let client = self
            .get_client(&record.client_id)
            .ok_or_else(|| "client not found for billing record".to_string())?;
        let link = whatsapp_link(record, &client)?;
        self.set_sent_via_whatsapp(record_id, true)?;
        Ok(link)
    }

    // ----- dashboard -----

    pub fn monthly_stats(&self, reference_month: &str) -> MonthlyStats {
        monthly_stats(&self.billing.list(), reference_month, today())
    }

    pub fn yearly_series(&self, year: &str) -> Vec<MonthBucket> {
        yearly_series(&self.billing.list(), year)
    }

    // ----- exports -----

    pub fn export_invoice_pdf(&self, record_id: &str) -> Result<(Vec<u8>, String), String> {
        let records = self.billing.list();
        let record = records
            .iter()
            .find(|r| r.id == record_id)
            .ok_or_else(|| format!("billing record {record_id} not found"))?;
        let client = self
            .get_client(&record.client_id)
            .ok_or_else(|| "client not found for billing record".to_string())?;
        let bytes = generate_invoice_pdf(record, &client, &self.settings.get())?;
        Ok((bytes, invoice_filename(record, &client)))
    }

    pub fn export_batch_zip(&self, filter: &RecordFilter) -> Result<(Vec<u8>, String), String> {
        let records = self.filter_records(filter);
        generate_batch_zip(&records, &self.clients.list(), &self.settings.get())
    }

    pub fn export_billing_csv(&self, reference_month: &str) -> String {
        let records = self.filter_records(&RecordFilter::for_month(reference_month));
        render_billing_csv(&records, &self.clients.list())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_uses_brazilian_separators() {
        assert_eq!(format_currency(0.0), "R$ 0,00");
        assert_eq!(format_currency(1234.5), "R$ 1.234,50");
        assert_eq!(format_currency(1_000_000.0), "R$ 1.000.000,00");
        assert_eq!(format_currency(-1234.5), "R$ -1.234,50");
        assert_eq!(format_currency(f64::NAN), "R$ 0,00");
    }

    #[test]
    fn date_formatting_tolerates_malformed_input() {
        assert_eq!(format_date_br("2025-03-05"), "05/03/2025");
        assert_eq!(format_date_br("2025-03-05T12:30:00Z"), "05/03/2025");
        assert_eq!(format_date_br(""), "");
        assert_eq!(format_date_br("  2025-03-05  "), "05/03/2025");
        // multibyte char straddling the 10-byte cut must not panic
        assert_eq!(format_date_br("aaaaaaaaaç"), "aaaaaaaaaç");
        assert_eq!(format_date_br("não é uma data válida"), "não é uma data válida");
    }

    #[test]
    fn cnpj_mask_is_progressive() {
        assert_eq!(format_cnpj("12345678000190"), "12.345.678/0001-90");
        assert_eq!(format_cnpj("123456"), "12.345.6");
        assert_eq!(format_cnpj("12.345.678/0001-90 extra"), "12.345.678/0001-90");
        assert_eq!(format_cnpj(""), "");
    }

    #[test]
    fn phone_and_cep_masks() {
        assert_eq!(format_phone("11987654321"), "(11) 98765-4321");
        assert_eq!(format_phone("11"), "11");
        assert_eq!(format_cep("15043060"), "15043-060");
        assert_eq!(format_cep("1504"), "1504");
    }

    #[test]
    fn cnpj_checksum() {
        // Valid test number (check digits computed by the two-pass scheme).
        assert!(validate_cnpj("11.222.333/0001-81"));
        assert!(!validate_cnpj("11.222.333/0001-82"));
        assert!(!validate_cnpj("11111111111111"));
        assert!(!validate_cnpj("123"));
    }

    #[test]
    fn month_resolution_accepts_all_encodings() {
        assert_eq!(reference_month_index("2025-03"), Some(2));
        assert_eq!(reference_month_index("2025/3"), Some(2));
        assert_eq!(reference_month_index("15/03/2025"), Some(2));
        assert_eq!(reference_month_index("Março de 2025"), Some(2));
        assert_eq!(reference_month_index("whenever"), None);
    }

    #[test]
    fn due_date_clamps_to_month_end() {
        assert_eq!(due_date_for("2025-03", 10).unwrap(), "2025-03-10");
        assert_eq!(due_date_for("2025-02", 31).unwrap(), "2025-02-28");
        assert_eq!(due_date_for("2024-02", 31).unwrap(), "2024-02-29");
        assert!(due_date_for("2025-13", 10).is_err());
    }

    #[test]
    fn percent_encode_is_url_safe() {
        assert_eq!(percent_encode("abc-123"), "abc-123");
        assert_eq!(percent_encode("a b"), "a%20b");
        assert_eq!(percent_encode("ç"), "%C3%A7");
    }

    #[test]
    fn csv_fields_are_escaped() {
        assert_eq!(csv_escape_field("plain"), "plain");
        assert_eq!(csv_escape_field("a,b"), "\"a,b\"");
        assert_eq!(csv_escape_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn completeness_states() {
        assert_eq!(documentation_status(None), DocumentationStatus::None);

        let empty = Documentation::default();
        assert_eq!(documentation_status(Some(&empty)), DocumentationStatus::None);

        let mut one = Documentation::default();
        one.contrato_social.delivered = true;
        assert_eq!(documentation_status(Some(&one)), DocumentationStatus::Partial);

        let mut all = Documentation::default();
        all.contrato_social.delivered = true;
        all.balancete.delivered = true;
        all.balanco_anual.delivered = true;
        all.livros_entradas_saidas.delivered = true;
        assert_eq!(documentation_status(Some(&all)), DocumentationStatus::Complete);
    }

    #[test]
    fn normalization_clears_undelivered_details() {
        let mut doc = Documentation::default();
        doc.balancete.total_assets = 1000.0;
        doc.balancete.received_on = Some("2025-01-15".to_string());
        doc.contrato_social.notes = "na pasta".to_string();
        let doc = doc.normalized();
        assert_eq!(doc.balancete.total_assets, 0.0);
        assert!(doc.balancete.received_on.is_none());
        assert!(doc.contrato_social.notes.is_empty());
    }
}
