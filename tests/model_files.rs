//! 模型文件测试：读取 JSON/RON 文档，驱动 CLI 各子命令，并在账本模型上执行带键转账。

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use tokennet::analysis::ImpactCategory;
use tokennet::config::AnalysisConfig;
use tokennet::driver::{self, AnalysisDriver};
use tokennet::exec::{Execution, FireError};
use tokennet::expr::{Bindings, Value};
use tokennet::net::io::{self, Format, IoError};
use tokennet::net::{Model, ModelError};
use tokennet::options::Options;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("models")
        .join(name)
}

fn bindings<const N: usize>(entries: [(&str, Value); N]) -> Bindings {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect::<HashMap<_, _>>()
}

fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("tokennet-{}-{}", tag, std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn ron_and_json_fixtures_load() {
    let cycle = io::read_model(fixture("cycle.ron")).unwrap();
    assert_eq!(cycle.name(), "cycle");
    assert_eq!(cycle.places().len(), 2);
    assert_eq!(cycle.total_initial_tokens(), 5);

    let token = io::read_model(fixture("token.json")).unwrap();
    assert_eq!(token.version(), "1.0");
    assert!(!token.place("balances").unwrap().is_token());
    assert!(token.place("balances").unwrap().exported);
    assert_eq!(token.arcs().iter().filter(|a| a.is_keyed()).count(), 3);

    let json = io::to_json_string(&cycle).unwrap();
    let reparsed = io::parse_model(&json, Format::Json).unwrap();
    assert_eq!(reparsed, cycle);
}

#[test]
fn invalid_documents_are_rejected() {
    let same_kind = r#"{
        "name": "bad",
        "places": [{ "id": "a" }, { "id": "b" }],
        "arcs": [{ "source": "a", "target": "b" }]
    }"#;
    assert!(matches!(
        io::parse_model(same_kind, Format::Json),
        Err(IoError::Model(ModelError::SameKindArc { .. }))
    ));

    let dangling = r#"{
        "name": "bad",
        "places": [{ "id": "a" }],
        "transitions": [{ "id": "t" }],
        "arcs": [{ "source": "a", "target": "ghost" }]
    }"#;
    assert!(matches!(
        io::parse_model(dangling, Format::Json),
        Err(IoError::Model(ModelError::UnknownEndpoint { .. }))
    ));

    assert!(matches!(
        io::read_model("model.yaml"),
        Err(IoError::UnsupportedFormat(ext)) if ext == "yaml"
    ));
}

#[test]
fn written_models_read_back() {
    let dir = scratch_dir("io");
    let model = io::read_model(fixture("token.json")).unwrap();
    let path = dir.join("token.ron");
    io::write_model(&path, &model).unwrap();
    let back: Model = io::read_model(&path).unwrap();
    assert_eq!(back, model);
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn ledger_transfers_keep_supply() {
    let model = io::read_model(fixture("token.json")).unwrap();
    let balances = model.place_id("balances").unwrap();
    let mut exec = Execution::new(&model);

    exec.fire_with_bindings(
        "transfer",
        &bindings([
            ("from", "alice".into()),
            ("to", "bob".into()),
            ("amount", "40".into()),
        ]),
    )
    .unwrap();
    assert_eq!(
        exec.marking().data(balances),
        Some(&Value::map([("alice", 60.into()), ("bob", 40.into())]))
    );

    let overdraw = exec.fire_with_bindings(
        "transfer",
        &bindings([
            ("from", "bob".into()),
            ("to", "carol".into()),
            ("amount", 41.into()),
        ]),
    );
    assert!(matches!(overdraw, Err(FireError::GuardNotSatisfied { .. })));

    exec.fire_with_bindings(
        "mint",
        &bindings([
            ("caller", "owner".into()),
            ("owner", "owner".into()),
            ("to", "carol".into()),
            ("amount", 1.into()),
        ]),
    )
    .unwrap();
    assert!(exec.check_invariants().iter().all(|o| o.holds()));
    assert_eq!(exec.history_ids(), vec!["transfer", "mint"]);

    let unauthorized = exec.fire_with_bindings(
        "mint",
        &bindings([
            ("caller", "mallory".into()),
            ("owner", "owner".into()),
            ("to", "mallory".into()),
            ("amount", 1.into()),
        ]),
    );
    assert!(matches!(unauthorized, Err(FireError::GuardNotSatisfied { .. })));
    assert_eq!(exec.sequence(), 2);
}

#[test]
fn analyze_subcommand_writes_reports() {
    let dir = scratch_dir("analyze");
    let output = dir.join("report.txt");
    let dot = dir.join("cycle.dot");
    let options = Options::parse_from_args([
        "tokennet".into(),
        "analyze".into(),
        fixture("cycle.ron").into_os_string(),
        "--dot".into(),
        dot.clone().into_os_string(),
        "--output".into(),
        output.clone().into_os_string(),
    ])
    .unwrap();

    let text = AnalysisDriver::new(options).unwrap().run().unwrap();
    assert!(text.starts_with("结构分析报告"));
    assert!(text.contains("P1 + P2 == 5"));
    assert!(fs::read_to_string(&dot).unwrap().starts_with("digraph"));

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.join("report.txt.json")).unwrap()).unwrap();
    assert_eq!(json["model"], "cycle");
    assert_eq!(json["declared"][0]["holds"], true);
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn config_file_drives_sensitivity() {
    let dir = scratch_dir("config");
    let config_path = dir.join("tokennet.toml");
    fs::write(&config_path, "time_span = 3.0\nmetric = \"token_mass\"\nmax_arcs = 2\n").unwrap();

    let options = Options::parse_from_args([
        "tokennet".into(),
        "--config".into(),
        config_path.clone().into_os_string(),
        "sensitivity".into(),
        fixture("cycle.ron").into_os_string(),
    ])
    .unwrap();
    let driver = AnalysisDriver::new(options).unwrap();
    assert_eq!(driver.config().time_span, 3.0);

    let model = io::read_model(fixture("cycle.ron")).unwrap();
    let summary = driver::sensitivity_summary(&model, driver.config()).unwrap();
    assert_eq!(summary.deletion.elements.len(), 2 + 2 + 2);
    assert!(summary
        .deletion
        .by_category(ImpactCategory::Critical)
        .any(|e| e.id == "P1"));
    assert_eq!(summary.rates.len(), 2);
    assert_eq!(summary.markings.len(), 2);

    let text = driver.run().unwrap();
    assert!(text.contains("敏感性分析报告"));
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn compare_and_eval_subcommands() {
    let config = AnalysisConfig::default();
    let cycle = fixture("cycle.ron");
    let options = Options::parse_from_args([
        "tokennet".into(),
        "compare".into(),
        cycle.clone().into_os_string(),
        cycle.into_os_string(),
    ])
    .unwrap();
    let text = AnalysisDriver::with_config(options, config).run().unwrap();
    assert!(text.contains("签名等价: true"));

    let options = Options::parse_from_args([
        "tokennet",
        "eval",
        "balance >= amount && caller == owner",
        "--bind",
        "balance=100",
        "--bind",
        "amount=20",
        "--bind",
        "caller=alice",
        "--bind",
        "owner=alice",
    ])
    .unwrap();
    assert_eq!(AnalysisDriver::new(options).unwrap().run().unwrap(), "true");
}

#[test]
fn reach_subcommand_uses_configured_budget() {
    let dir = scratch_dir("reach");
    let config_path = dir.join("tokennet.toml");
    fs::write(&config_path, "max_reach_steps = 2\n").unwrap();

    let reach = |extra: &[&str]| {
        let mut args: Vec<std::ffi::OsString> = vec![
            "tokennet".into(),
            "--config".into(),
            config_path.clone().into_os_string(),
            "reach".into(),
            fixture("cycle.ron").into_os_string(),
            "--set".into(),
            "P1=0".into(),
            "--set".into(),
            "P2=5".into(),
        ];
        args.extend(extra.iter().map(|arg| arg.into()));
        let options = Options::parse_from_args(args).unwrap();
        AnalysisDriver::new(options).unwrap().run().unwrap()
    };

    assert!(reach(&[]).contains("在 2 步内不可达"));
    assert!(reach(&["--max-steps", "5"]).contains("可达: 5 步"));
    fs::remove_dir_all(&dir).unwrap();
}
