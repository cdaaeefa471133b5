use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn reckon(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("reckon").unwrap();
    cmd.env("RECKON_HOME", home.path())
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG");
    cmd
}

fn init(home: &TempDir) {
    reckon(home)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized reckon"));
}

#[test]
fn commands_fail_before_init() {
    let home = tempfile::tempdir().unwrap();
    reckon(&home)
        .args(["transactions", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Run `reckon init`"));
}

#[test]
fn receipt_links_to_matching_transaction() {
    let home = tempfile::tempdir().unwrap();
    init(&home);

    reckon(&home)
        .args([
            "transactions",
            "add",
            "--date",
            "2024-06-15",
            "--description",
            "POS SCREWFIX IRELAND",
            "--amount",
            "-42.50",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Added transaction"));

    reckon(&home)
        .args([
            "receipts",
            "add",
            "--image",
            "receipts/screwfix.jpg",
            "--supplier",
            "Screwfix",
            "--date",
            "2024-06-15",
            "--total",
            "42.50",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Linked"))
        .stdout(predicate::str::contains("100%"));

    reckon(&home)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("1 (0 without receipt)"))
        .stdout(predicate::str::contains("1 (0 awaiting review)"));
}

#[test]
fn weak_match_is_left_for_review() {
    let home = tempfile::tempdir().unwrap();
    init(&home);

    reckon(&home)
        .args([
            "transactions",
            "add",
            "--date",
            "2024-06-15",
            "--description",
            "CARD PAYMENT",
            "--amount",
            "-10.00",
        ])
        .assert()
        .success();

    reckon(&home)
        .args([
            "receipts",
            "add",
            "--image",
            "receipts/cafe.jpg",
            "--supplier",
            "Bewleys",
            "--date",
            "2024-06-16",
            "--total",
            "10.00",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Needs review:"));
}

#[test]
fn vat_check_blocks_hotel_unless_conference() {
    let home = tempfile::tempdir().unwrap();
    reckon(&home)
        .args(["vat", "check", "Jurys Inn Hotel Cork"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Not deductible"));

    reckon(&home)
        .args(["vat", "check", "Jurys Inn Hotel Cork", "--conference"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Deductible"));
}

#[test]
fn third_correction_makes_vendor_trusted() {
    let home = tempfile::tempdir().unwrap();
    init(&home);

    for _ in 0..3 {
        reckon(&home)
            .args([
                "corrections",
                "record",
                "--description",
                "WOODIES DIY NAAS",
                "--category",
                "Tools & Equipment",
            ])
            .assert()
            .success();
    }

    reckon(&home)
        .args(["corrections", "lookup", "WOODIES DIY NAAS 0042"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Tools & Equipment"));
}

fn last_word(output: &[u8]) -> String {
    String::from_utf8_lossy(output)
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().last())
        .unwrap()
        .to_string()
}

#[test]
fn link_refuses_another_users_transaction() {
    let home = tempfile::tempdir().unwrap();
    init(&home);

    let added = reckon(&home)
        .args([
            "--user",
            "bob",
            "transactions",
            "add",
            "--date",
            "2024-06-15",
            "--description",
            "POS SCREWFIX IRELAND",
            "--amount",
            "-42.50",
        ])
        .output()
        .unwrap();
    let transaction = last_word(&added.stdout);

    let stored = reckon(&home)
        .args([
            "receipts",
            "add",
            "--image",
            "receipts/screwfix.jpg",
            "--total",
            "42.50",
            "--no-match",
        ])
        .output()
        .unwrap();
    let receipt = last_word(&stored.stdout);

    reckon(&home)
        .args(["receipts", "link", &receipt, &transaction])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown transaction"));
}
