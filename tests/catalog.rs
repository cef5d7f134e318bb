//! End-to-end coverage of the version-indexed query catalog: a `Metric`
//! with both a core tree and an extension tree, chosen the way the
//! collection engine chooses it for a server.

use pgexporter::catalog::{Alternative, Metric, ServerFilter, SortMode, VersionTree};
use pgexporter::pg::{ColumnDef, ColumnKind};

fn core_alt(version: u32, sql: &str) -> Alternative<u32> {
    Alternative {
        version,
        sql: sql.to_string(),
        columns: vec![ColumnDef {
            name: "value".to_string(),
            kind: ColumnKind::Gauge,
        }],
    }
}

fn ext_alt(major: u32, minor: u32, patch: u32, sql: &str) -> Alternative<pgexporter::catalog::SemVer> {
    Alternative {
        version: pgexporter::catalog::SemVer { major, minor, patch },
        sql: sql.to_string(),
        columns: vec![ColumnDef {
            name: "value".to_string(),
            kind: ColumnKind::Gauge,
        }],
    }
}

fn metric_with(core: VersionTree<u32>, extension: VersionTree<pgexporter::catalog::SemVer>) -> Metric {
    Metric {
        tag: "pgexporter_test_metric".to_string(),
        help: "test".to_string(),
        collector_group: "test".to_string(),
        sort_mode: SortMode::ByName,
        server_filter: ServerFilter::Both,
        exec_on_all_databases: false,
        core,
        extension_name: Some("pg_stat_statements".to_string()),
        extension,
    }
}

#[test]
fn chooses_greatest_core_alternative_at_or_below_version() {
    let mut core = VersionTree::new();
    core.insert(core_alt(10, "SELECT 10"));
    core.insert(core_alt(13, "SELECT 13"));
    core.insert(core_alt(16, "SELECT 16"));
    let metric = metric_with(core, VersionTree::new());

    let chosen = metric.choose(14, None).unwrap();
    assert_eq!(chosen.sql(), "SELECT 13");

    let chosen = metric.choose(16, None).unwrap();
    assert_eq!(chosen.sql(), "SELECT 16");

    assert!(metric.choose(9, None).is_none());
}

#[test]
fn prefers_extension_alternative_over_core_when_available() {
    let mut core = VersionTree::new();
    core.insert(core_alt(10, "SELECT core"));
    let mut extension = VersionTree::new();
    extension.insert(ext_alt(1, 9, 0, "SELECT extension"));
    let metric = metric_with(core, extension);

    let chosen = metric
        .choose(16, Some(pgexporter::catalog::SemVer { major: 1, minor: 9, patch: 2 }))
        .unwrap();
    assert_eq!(chosen.sql(), "SELECT extension");
}

#[test]
fn falls_back_to_core_when_extension_version_too_old() {
    let mut core = VersionTree::new();
    core.insert(core_alt(10, "SELECT core"));
    let mut extension = VersionTree::new();
    extension.insert(ext_alt(1, 9, 0, "SELECT extension"));
    let metric = metric_with(core, extension);

    let chosen = metric
        .choose(16, Some(pgexporter::catalog::SemVer { major: 1, minor: 0, patch: 0 }))
        .unwrap();
    assert_eq!(chosen.sql(), "SELECT core");
}

#[test]
fn tree_stays_balanced_after_ascending_inserts() {
    let mut tree: VersionTree<u32> = VersionTree::new();
    for v in 0..200u32 {
        tree.insert(core_alt(v, "SELECT 1"));
    }
    // A correctly-rotating AVL tree over 200 ascending keys stays within
    // ~1.44*log2(n) height; a plain unbalanced BST would be 200 deep.
    assert!(tree.height() < 20);
}
