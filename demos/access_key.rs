use chrono::NaiveDate;
use efactura::core::*;

fn main() {
    let numeric_code = NumericCode::parse("12345678").unwrap();
    let key = AccessKey::generate(&AccessKeyParts {
        issue_date: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
        document_type: DocumentType::Invoice,
        ruc: "1790012345001",
        environment: Environment::Test,
        establishment: "001",
        emission_point: "002",
        sequential: 123,
        numeric_code: &numeric_code,
    })
    .expect("all parts are valid");

    println!("Access key:    {key}");
    println!("Check digit:   {}", key.check_digit());

    // Parsing validates length, digits and the check digit
    let parsed = AccessKey::parse(key.as_str()).unwrap();
    println!("Issue date:    {:?}", parsed.issue_date());
    println!("Document type: {:?}", parsed.document_type());
    println!("Environment:   {}", parsed.environment());
    println!(
        "Series:        {}-{}-{:09}",
        parsed.establishment(),
        parsed.emission_point(),
        parsed.sequential()
    );

    let mut tampered = key.as_str().to_string();
    tampered.replace_range(30..31, "9");
    match AccessKey::parse(&tampered) {
        Ok(_) => println!("Tampered key accepted?!"),
        Err(e) => println!("Tampered key rejected: {e}"),
    }
}
