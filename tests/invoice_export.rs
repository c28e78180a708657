use contadesk::*;
use std::io::Cursor;

// 1x1 PNG, enough for the embedded-image path without touching the network.
const TINY_PNG_B64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

fn client_input(name: &str) -> NewClient {
    NewClient {
        name: name.to_string(),
        cnpj: "11.222.333/0001-81".to_string(),
        cnpj_card: "arquivo.pdf".to_string(),
        state_registration: "110.042.490.114".to_string(),
        municipal_registration: "3.341.953-2".to_string(),
        accounting_start_date: "2024-01-02".to_string(),
        address: "Rua das Laranjeiras, 100".to_string(),
        city: "São Paulo".to_string(),
        cep: "01311-000".to_string(),
        phone: "11987654321".to_string(),
        email: "financeiro@exemplo.com.br".to_string(),
        monthly_fee: 500.0,
        due_day: 10,
        active: true,
        documentation: None,
    }
}

fn app_with_march_billing() -> Backoffice {
    let app = Backoffice::open_in_memory().unwrap();
    app.create_client(client_input("Padaria Central")).unwrap();
    app.generate_month("2025-03").unwrap();
    app
}

#[test]
fn invoice_pdf_is_generated_without_assets() {
    let app = app_with_march_billing();
    let id = app.list_billing()[0].id.clone();

    // empty logo/QR settings must not fail the document
    let (bytes, filename) = app.export_invoice_pdf(&id).unwrap();
    assert!(bytes.starts_with(b"%PDF"));
    assert!(bytes.len() > 1000);
    assert_eq!(filename, "Fatura_Padaria_Central_2025-03.pdf");
}

#[test]
fn invoice_pdf_embeds_data_url_assets() {
    let app = app_with_march_billing();
    app.settings
        .update(SettingsPatch {
            firm_name: Some("Escritório Aurora Contabilidade".to_string()),
            logo_url: Some(format!("data:image/png;base64,{TINY_PNG_B64}")),
            qr_code_url: Some(format!("data:image/png;base64,{TINY_PNG_B64}")),
            ..SettingsPatch::default()
        })
        .unwrap();

    let id = app.list_billing()[0].id.clone();
    let (bytes, _) = app.export_invoice_pdf(&id).unwrap();
    assert!(bytes.starts_with(b"%PDF"));
}

// Stored dates can predate validation (imports, hand-edited payloads); the
// renderer must print them as-is instead of panicking on the prefix cut.
#[test]
fn invoice_renders_records_with_garbled_stored_dates() {
    let app = app_with_march_billing();
    let mut records = app.list_billing();
    records[0].created_at = "aaaaaaaaaç".to_string();
    records[0].due_date = "início de abril".to_string();
    records[0].extra_services.push(ExtraService {
        description: "Alteração contratual".to_string(),
        amount: 150.50,
        date: "meados de março".to_string(),
    });
    recompute_total(&mut records[0]);
    let id = records[0].id.clone();
    app.billing.save(&records).unwrap();

    let (bytes, _) = app.export_invoice_pdf(&id).unwrap();
    assert!(bytes.starts_with(b"%PDF"));

    let (zip_bytes, _) = app
        .export_batch_zip(&RecordFilter::for_month("2025-03"))
        .unwrap();
    let archive = zip::ZipArchive::new(Cursor::new(zip_bytes)).unwrap();
    assert_eq!(archive.len(), 1);
}

#[test]
fn invoice_number_derives_from_reference_month() {
    let app = app_with_march_billing();
    let record = &app.list_billing()[0];
    assert_eq!(invoice_number_for(record), "2025030001");
}

#[test]
fn batch_zip_contains_one_entry_per_resolvable_record() {
    let app = Backoffice::open_in_memory().unwrap();
    app.create_client(client_input("Padaria Central")).unwrap();
    app.create_client(client_input("Mercearia do Bairro")).unwrap();
    app.generate_month("2025-03").unwrap();

    let (bytes, name) = app
        .export_batch_zip(&RecordFilter::for_month("2025-03"))
        .unwrap();
    assert!(name.starts_with("Honorarios_"));
    assert!(name.ends_with(".zip"));

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    assert_eq!(archive.len(), 2);
    let names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    assert!(names.contains(&"Fatura_Padaria_Central_2025-03.pdf".to_string()));
    assert!(names.contains(&"Fatura_Mercearia_do_Bairro_2025-03.pdf".to_string()));
}

#[test]
fn batch_zip_skips_orphaned_records() {
    let app = Backoffice::open_in_memory().unwrap();
    let doomed = app.create_client(client_input("Padaria Central")).unwrap();
    app.create_client(client_input("Mercearia do Bairro")).unwrap();
    app.generate_month("2025-03").unwrap();
    app.delete_client(&doomed.id).unwrap();

    let (bytes, _) = app
        .export_batch_zip(&RecordFilter::for_month("2025-03"))
        .unwrap();
    let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    assert_eq!(archive.len(), 1);
}

#[test]
fn empty_filter_result_yields_an_empty_archive() {
    let app = app_with_march_billing();
    let (bytes, _) = app
        .export_batch_zip(&RecordFilter::for_month("2030-01"))
        .unwrap();
    let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    assert_eq!(archive.len(), 0);
}

#[test]
fn csv_export_lists_month_records() {
    let app = Backoffice::open_in_memory().unwrap();
    app.create_client(client_input("Padaria, Pães & Cia")).unwrap();
    app.generate_month("2025-03").unwrap();
    let id = app.list_billing()[0].id.clone();
    app.toggle_paid(&id).unwrap();

    let csv = app.export_billing_csv("2025-03");
    let mut lines = csv.lines();
    assert_eq!(
        lines.next().unwrap(),
        "client,referenceMonth,baseFee,extras,total,status,dueDate,paymentDate"
    );
    let row = lines.next().unwrap();
    // the comma in the client name forces quoting
    assert!(row.starts_with("\"Padaria, Pães & Cia\","));
    assert!(row.contains(",2025-03,500.00,0.00,500.00,PAID,2025-03-10,"));
    assert!(lines.next().is_none());
}

#[test]
fn csv_keeps_rows_whose_client_is_gone() {
    let app = Backoffice::open_in_memory().unwrap();
    let c = app.create_client(client_input("Padaria Central")).unwrap();
    app.generate_month("2025-03").unwrap();
    app.delete_client(&c.id).unwrap();

    let csv = app.export_billing_csv("2025-03");
    let row = csv.lines().nth(1).unwrap();
    assert!(row.starts_with(",2025-03,"));
}
