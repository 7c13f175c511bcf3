#[path = "common/mod.rs"]
mod common;

use common::*;
use std::fs;
use std::path::Path;
use std::time::Duration;
use viewership_etl::{
    discover_canonical, fetch_window, select_keys, DayResult, LocalStore, Provider, ProviderList, ReportDate,
    ViewershipETL,
};

const PREFIX: &str = "cdw-viewership-reports";

/// Store layout for reporting day 2016-06-02 with one day of late arrivals:
/// - Alpha 06-01: one row from the previous day, one spilled over into 06-02.
/// - Alpha 06-02: two rows, out of order.
/// - Beta Cable 06-03: one late 06-02 row, one genuine 06-03 row.
/// - Alpha 06-10: outside the window, never fetched.
/// - Gamma: no files at all.
fn seed_store(root: &Path) {
    put_gzip_source(root, &format!("{PREFIX}/Alpha-20160601.csv.gzip"), &[
        ("a0", "2016-06-01 23:50:00"),
        ("a1", "2016-06-02 00:05:00"),
    ]);
    put_gzip_source(root, &format!("{PREFIX}/Alpha-20160602.csv.gzip"), &[
        ("a2", "2016-06-02 10:00:00"),
        ("a3", "2016-06-02 08:00:00"),
    ]);
    put_gzip_source(root, &format!("{PREFIX}/Beta Cable-20160603.csv.gzip"), &[
        ("b1", "2016-06-02 23:59:00"),
        ("b2", "2016-06-03 01:00:00"),
    ]);
    put_gzip_source(root, &format!("{PREFIX}/Alpha-20160610.csv.gzip"), &[("z", "2016-06-10 01:00:00")]);
    put_gzip_source(root, "elsewhere/Alpha-20160602.csv.gzip", &[("q", "2016-06-02 09:00:00")]);
}

fn etl(work: &Path, out: &Path) -> ViewershipETL {
    let day = ReportDate::new(2016, 6, 2);
    ViewershipETL::new()
        .providers(providers())
        .date_range(Some(day), Some(day))
        .days_after(1)
        .concurrency(2)
        .max_attempts(2)
        .retry_delay(Duration::ZERO)
        .work_dir(work)
        .output_dir(out)
        .progress(false)
}

/// Full run: fetch the window around the day, merge across providers, filter to the day.
/// Outcome: report rows in time order from every provider, late arrivals included,
/// out-of-day rows excluded, and one count file per provider (Gamma with 0).
#[test]
fn end_to_end_report_for_one_day() {
    let root = temp_dir();
    let work = temp_dir();
    let out = temp_dir();
    seed_store(&root);

    let summary = etl(&work, &out).run(&LocalStore::new(&root)).unwrap();
    assert_eq!(summary.fetched, 3);
    assert!(summary.failed.is_empty());
    assert_eq!(summary.days.len(), 1);
    let DayResult::Completed(day) = &summary.days[0] else { panic!("day failed: {:?}", summary.days[0]) };
    assert_eq!(day.inputs, 3);
    assert_eq!(day.merged, 6);
    assert!(day.truncated.is_empty());

    let report = out.join("viewership-report-20160602.csv");
    let rows = read_ts_hh(&report);
    let ids: Vec<&str> = rows.iter().map(|(_, h)| h.as_str()).collect();
    assert_eq!(ids, vec!["a1", "a3", "a2", "b1"]);
    assert!(rows.windows(2).all(|w| w[0].0 <= w[1].0));

    assert_eq!(read_lines(&out.join("hh_count_Alpha_20160602.csv"))[1], "2016-06-02,1,3");
    assert_eq!(read_lines(&out.join("hh_count_Beta Cable_20160602.csv"))[1], "2016-06-02,2,1");
    assert_eq!(read_lines(&out.join("hh_count_Gamma_20160602.csv"))[1], "2016-06-02,3,0");

    assert!(!work.join(PREFIX).join("Alpha-20160610.csv").exists());
    assert!(!work.join("elsewhere").exists());
}

/// Re-aggregating from the canonical files of a previous run gives byte-identical output.
#[test]
fn rerun_is_idempotent() {
    let root = temp_dir();
    let work = temp_dir();
    let out = temp_dir();
    seed_store(&root);

    let e = etl(&work, &out);
    e.run(&LocalStore::new(&root)).unwrap();
    let report = out.join("viewership-report-20160602.csv");
    let first = fs::read(&report).unwrap();

    let again = e.aggregate().unwrap();
    assert!(again[0].is_completed());
    assert_eq!(fs::read(&report).unwrap(), first);
}

/// A day with no canonical files still produces a header-only report and zero counts.
#[test]
fn day_without_inputs_yields_empty_report() {
    let work = temp_dir();
    let out = temp_dir();
    let day = ReportDate::new(2017, 1, 1);
    let summary = etl(&work, &out).aggregate_day(day).unwrap();

    assert_eq!(summary.inputs, 0);
    assert_eq!(summary.report.accepted, 0);
    assert_eq!(read_lines(&out.join("viewership-report-20170101.csv")).len(), 1);
    assert_eq!(read_lines(&out.join("hh_count_Alpha_20170101.csv"))[1], "2017-01-01,1,0");
}

/// Canonical files written out of order are flagged by the integrity check.
#[test]
fn integrity_check_flags_unsorted_canonical_file() {
    let root = temp_dir();
    let work = temp_dir();
    let out = temp_dir();
    seed_store(&root);
    let e = etl(&work, &out);
    e.fetch(&LocalStore::new(&root)).unwrap();
    assert!(e.check_canonical_integrity().unwrap().is_empty());

    let bad = work.join(PREFIX).join("Gamma-20160602.csv");
    write_canonical_rows(&bad, &[("g2", "2016-06-02 05:00:00"), ("g1", "2016-06-02 04:00:00")]);
    let problems = e.check_canonical_integrity().unwrap();
    assert_eq!(problems.len(), 1);
    assert_eq!(problems[0].0, bad);
}

/// The run summary serializes with per-day status tags.
#[test]
fn run_summary_writes_json() {
    let root = temp_dir();
    let work = temp_dir();
    let out = temp_dir();
    seed_store(&root);
    let summary = etl(&work, &out).run(&LocalStore::new(&root)).unwrap();

    let path = out.join("summary.json");
    summary.write_json(&path).unwrap();
    let v: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    assert_eq!(v["fetched"], 3);
    assert_eq!(v["days"][0]["status"], "completed");
    assert_eq!(v["days"][0]["date"], "20160602");
}

/// A reversed date range is rejected before anything runs.
#[test]
fn reversed_range_is_an_error() {
    let e = ViewershipETL::new()
        .date_range(Some(ReportDate::new(2016, 6, 3)), Some(ReportDate::new(2016, 6, 1)))
        .progress(false);
    assert!(e.aggregate().is_err());
}

/// When one provider name ends with another, the longer name keeps its own keys.
#[test]
fn key_selection_prefers_longest_provider_name() {
    let providers = ProviderList::new(vec![Provider::new("7", "Cable"), Provider::new("2", "Beta Cable")]);
    let keys = vec![
        format!("{PREFIX}/Beta Cable-20160601.csv.gzip"),
        format!("{PREFIX}/Cable-20160601.csv.gzip"),
        format!("{PREFIX}/Cable-20160605.csv.gzip"),
    ];
    let selected = select_keys(&keys, &providers, &[ReportDate::new(2016, 6, 1)]);
    let got: Vec<(&str, usize)> = selected.iter().map(|s| (s.key.as_str(), s.provider)).collect();
    assert_eq!(got, vec![(keys[0].as_str(), 1), (keys[1].as_str(), 0)]);

    let work = temp_dir();
    write_canonical_rows(&work.join(PREFIX).join("Beta Cable-20160601.csv"), &[]);
    write_canonical_rows(&work.join(PREFIX).join("Cable-20160601.csv"), &[]);
    write_canonical_rows(&work.join(PREFIX).join("Cable-20160609.csv"), &[]);
    fs::write(work.join(PREFIX).join("Cable-20160601.csv.gzip"), b"").unwrap();
    let found = discover_canonical(&work, &providers, &[ReportDate::new(2016, 6, 1)]);
    let got: Vec<(usize, String)> = found
        .iter()
        .map(|c| (c.provider, c.path.file_name().unwrap().to_string_lossy().into_owned()))
        .collect();
    assert_eq!(got, vec![(0, "Cable-20160601.csv".to_string()), (1, "Beta Cable-20160601.csv".to_string())]);
}

#[test]
fn dates_parse_and_expand() {
    let d: ReportDate = "2016/06/01".parse().unwrap();
    assert_eq!(d, "2016-06-01".parse::<ReportDate>().unwrap());
    assert_eq!(d, "20160601".parse::<ReportDate>().unwrap());
    assert!("2016-13-01".parse::<ReportDate>().is_err());
    assert!("June 1".parse::<ReportDate>().is_err());

    let around: Vec<String> = d.look_around(2).iter().map(|x| x.compact()).collect();
    assert_eq!(around, vec!["20160531", "20160601", "20160602", "20160603"]);

    let window: Vec<String> =
        fetch_window(d, ReportDate::new(2016, 6, 2), 1).iter().map(|x| x.dashed()).collect();
    assert_eq!(window, vec!["2016-05-31", "2016-06-01", "2016-06-02", "2016-06-03"]);
}

/// Two reporting days where the first one's report path is occupied by a directory.
/// Outcome: the first day is recorded as failed without leaving its `.inprogress`
/// file behind, and the second day still completes with its own report.
#[test]
fn failing_day_does_not_stop_the_others() {
    let root = temp_dir();
    let work = temp_dir();
    let out = temp_dir();
    seed_store(&root);
    fs::create_dir_all(out.join("viewership-report-20160602.csv")).unwrap();

    let e = etl(&work, &out).date_range(Some(ReportDate::new(2016, 6, 2)), Some(ReportDate::new(2016, 6, 3)));
    let summary = e.run(&LocalStore::new(&root)).unwrap();
    assert_eq!(summary.days.len(), 2);

    let DayResult::Failed { date, error } = &summary.days[0] else { panic!("expected failure: {:?}", summary.days[0]) };
    assert_eq!(date, "20160602");
    assert!(error.contains("viewership-report-20160602.csv"), "{error}");
    assert!(!out.join("viewership-report-20160602.csv.inprogress").exists());
    assert!(!out.join("hh_count_Alpha_20160602.csv").exists());

    let DayResult::Completed(next) = &summary.days[1] else { panic!("day failed: {:?}", summary.days[1]) };
    assert_eq!(next.date, "20160603");
    let ids: Vec<String> =
        read_ts_hh(&out.join("viewership-report-20160603.csv")).into_iter().map(|(_, h)| h).collect();
    assert_eq!(ids, vec!["b2"]);
    assert_eq!(read_lines(&out.join("hh_count_Beta Cable_20160603.csv"))[1], "2016-06-03,2,1");
}

/// A canonical file with a malformed row in the middle feeds a day's merge.
/// Outcome: rows before the bad one reach the report, the file is listed as
/// truncated in the day summary, and the other provider is unaffected.
#[test]
fn truncated_input_is_listed_in_day_summary() {
    let work = temp_dir();
    let out = temp_dir();
    let alpha = work.join(PREFIX).join("Alpha-20160602.csv");
    write_canonical_rows(&alpha, &[("a1", "2016-06-02 01:00:00"), ("a2", "2016-06-02 03:00:00")]);
    let mut text = fs::read_to_string(&alpha).unwrap();
    text.push_str("broken,row\n");
    text.push_str("2016-06-02 05:00:00,a3,975540,x,3,KETA,watch,79081,USA\n");
    fs::write(&alpha, text).unwrap();
    write_canonical_rows(&work.join(PREFIX).join("Beta Cable-20160602.csv"), &[("b1", "2016-06-02 02:00:00")]);

    let summary = etl(&work, &out).aggregate_day(ReportDate::new(2016, 6, 2)).unwrap();
    assert_eq!(summary.inputs, 2);
    assert_eq!(summary.truncated.len(), 1);
    assert_eq!(summary.truncated[0].path, alpha);
    assert!(!summary.truncated[0].reason.is_empty());
    assert!(summary.unopened.is_empty());

    let ids: Vec<String> =
        read_ts_hh(&out.join("viewership-report-20160602.csv")).into_iter().map(|(_, h)| h).collect();
    assert_eq!(ids, vec!["a1", "b1", "a2"]);
    assert_eq!(read_lines(&out.join("hh_count_Alpha_20160602.csv"))[1], "2016-06-02,1,2");
}

/// A directory under the work dir that cannot be listed.
/// Outcome: the day still completes and the directory shows up in `unopened`.
#[cfg(unix)]
#[test]
fn unreadable_work_dir_entry_is_reported() {
    use std::os::unix::fs::PermissionsExt;

    let work = temp_dir();
    let out = temp_dir();
    write_canonical_rows(&work.join(PREFIX).join("Alpha-20160602.csv"), &[("a1", "2016-06-02 01:00:00")]);
    let locked = work.join("locked");
    fs::create_dir_all(&locked).unwrap();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    if fs::read_dir(&locked).is_ok() {
        // Running with privileges that ignore directory permissions.
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let res = etl(&work, &out).aggregate_day(ReportDate::new(2016, 6, 2));
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
    let summary = res.unwrap();

    assert_eq!(summary.inputs, 1);
    assert_eq!(summary.report.accepted, 1);
    assert!(summary.unopened.iter().any(|s| s.path == locked), "{:?}", summary.unopened);
}
