mod common;

use std::fs;

use chrono::Duration;
use seisan_picker::{
    batch::{discover_source_files, BatchDriver, StartMode},
    catalog::read_all_definitions,
    mseed,
    resolver::ArchiveResolver,
    stats::{read_stats, write_stats, BatchProgress, EventDescription, PicksDescription},
    PickerError,
};

use common::{origin, sfile_text, tree, write_sfile, Fixture, STATION};

const EVENT_ID: &str = "20140413140958";

fn resolver(fx: &Fixture) -> ArchiveResolver {
    let cfg = fx.config();
    ArchiveResolver::new(read_all_definitions(&cfg.definitions).unwrap(), cfg.archives_path)
}

fn standard_event(fx: &Fixture) {
    let picks = [
        (STATION, "P", origin() + Duration::seconds(5)),
        (STATION, "S", origin() + Duration::seconds(10)),
    ];
    write_sfile(&fx.rea().join("2014").join("04"), "13-1409-58L.S201404", &sfile_text(Some(EVENT_ID), " 3.1", &picks));
}

#[test]
fn fresh_run_writes_groups_and_second_run_skips() {
    let fx = Fixture::new(&[STATION]);
    fx.write_station_archives(STATION);
    standard_event(&fx);

    let cfg = fx.config();
    let res = resolver(&fx);
    let files = discover_source_files(&cfg.rea_path).unwrap();
    assert_eq!(files.len(), 1);

    let mut driver = BatchDriver::new(&cfg, &res).unwrap();
    assert_eq!(driver.mode(), &StartMode::Fresh);
    let summary = driver.run(&files).unwrap();
    assert_eq!(summary.events_saved, 1);
    assert_eq!(summary.groups_saved, 2);

    let event_dir = fx.out().join(EVENT_ID);
    let p_group = event_dir.join("ST1.P.0");
    for ch in ["BHN", "BHE", "BHZ"] {
        assert!(p_group.join(format!(".ST1.{ch}.P.MSEED")).is_file(), "{ch} slice missing");
    }
    assert!(event_dir.join("ST1.S.0").join("picks.stats").is_file());

    let ev: EventDescription = read_stats(&event_dir).unwrap();
    assert_eq!(ev.event_id, EVENT_ID);
    assert_eq!(ev.magnitude, Some(3.1));
    let picks: PicksDescription = read_stats(&p_group).unwrap();
    assert_eq!(picks.phase_hint, "P");
    assert_eq!(picks.distance, Some(30.0));
    assert_eq!(picks.wave_start_time, Some(origin() + Duration::seconds(3)));

    let progress: BatchProgress = read_stats(&fx.out()).unwrap();
    assert!(progress.finished);
    assert!(progress.file_currently_parsed.is_none());
    assert_eq!(progress.total_phases_parsed, 2);

    // second run: nothing new on disk
    let before = tree(&fx.out());
    let mut again = BatchDriver::new(&cfg, &res).unwrap();
    let summary = again.run(&files).unwrap();
    assert_eq!(summary.events_skipped, 1);
    assert_eq!(summary.events_saved, 0);
    assert_eq!(tree(&fx.out()), before);

    let progress: BatchProgress = read_stats(&fx.out()).unwrap();
    assert_eq!(progress.total_files_parsed, 2);
    assert_eq!(progress.last_run_files_parsed, 1);
}

#[test]
fn interrupted_file_is_reprocessed() {
    let fx = Fixture::new(&[STATION]);
    fx.write_station_archives(STATION);
    standard_event(&fx);

    let cfg = fx.config();
    let res = resolver(&fx);
    let files = discover_source_files(&cfg.rea_path).unwrap();
    BatchDriver::new(&cfg, &res).unwrap().run(&files).unwrap();

    // simulate a crash half way through the file
    let lost = fx.out().join(EVENT_ID).join("ST1.S.0").join(".ST1.BHZ.S.MSEED");
    fs::remove_file(&lost).unwrap();
    let crashed = BatchProgress {
        file_currently_parsed: Some(files[0].clone()),
        error_event_id:        Some(EVENT_ID.into()),
        finished:              false,
        ..BatchProgress::default()
    };
    write_stats(&fx.out(), &crashed).unwrap();

    let mut driver = BatchDriver::new(&cfg, &res).unwrap();
    assert!(matches!(driver.mode(), StartMode::Resuming { file: Some(_), .. }));
    let summary = driver.run(&files).unwrap();
    assert_eq!(summary.events_saved, 1);
    assert_eq!(summary.events_skipped, 0);
    assert!(lost.is_file());
    // no leftovers from the first pass
    assert!(!fx.out().join(EVENT_ID).join("ST1.S.1").exists());
}

#[test]
fn corrupt_progress_is_fatal() {
    let fx = Fixture::new(&[STATION]);
    fs::create_dir_all(fx.out()).unwrap();
    fs::write(fx.out().join("picking.stats"), "# [Picking Statistics]\nVersion = 1\nBogus = 3\n").unwrap();

    let cfg = fx.config();
    let res = resolver(&fx);
    assert!(matches!(BatchDriver::new(&cfg, &res), Err(PickerError::FatalConfiguration(_))));
}

#[test]
fn duplicate_ids_in_one_run_get_suffixes() {
    let fx = Fixture::new(&[STATION]);
    fx.write_station_archives(STATION);
    let picks = [(STATION, "P", origin() + Duration::seconds(5))];
    let text = sfile_text(Some(EVENT_ID), " 3.1", &picks);
    write_sfile(&fx.rea(), "a.S201404", &text);
    write_sfile(&fx.rea(), "b.S201404", &text);

    let cfg = fx.config();
    let res = resolver(&fx);
    let files = discover_source_files(&cfg.rea_path).unwrap();
    let summary = BatchDriver::new(&cfg, &res).unwrap().run(&files).unwrap();
    assert_eq!(summary.events_saved, 2);
    assert!(fx.out().join(EVENT_ID).join("event.stats").is_file());
    assert!(fx.out().join(format!("{EVENT_ID}_1")).join("ST1.P.0").is_dir());

    let summary = BatchDriver::new(&cfg, &res).unwrap().run(&files).unwrap();
    assert_eq!(summary.events_skipped, 2);
    assert!(fx.out().join(format!("{EVENT_ID}_1")).join("event.stats").is_file());
}

#[test]
fn bad_files_are_counted_and_the_run_goes_on() {
    let fx = Fixture::new(&[STATION]);
    fx.write_station_archives(STATION);
    let picks = [(STATION, "P", origin() + Duration::seconds(5))];

    write_sfile(&fx.rea(), "a.S201404", &sfile_text(None, " 3.1", &picks));
    let id_only = common::nordic_line(&[(2, "ACTION:UPD 14-04-13 14:17 OP:mkt  STATUS:"), (58, "ID:"), (61, "20140413150000")], 'I');
    write_sfile(&fx.rea(), "b.S201404", &id_only);
    write_sfile(&fx.rea(), "c.S201404", &sfile_text(Some(EVENT_ID), " 3.1", &picks));

    let cfg = fx.config();
    let res = resolver(&fx);
    let files = discover_source_files(&cfg.rea_path).unwrap();
    let summary = BatchDriver::new(&cfg, &res).unwrap().run(&files).unwrap();
    assert_eq!(summary.files_seen, 3);
    assert_eq!(summary.identity_missing, 1);
    assert_eq!(summary.unreadable, 1);
    assert_eq!(summary.events_saved, 1);
    assert!(!fx.out().join("20140413150000").exists());
}

#[test]
fn filtered_and_uncovered_events() {
    let fx = Fixture::new(&[STATION, "ST2"]);
    fx.write_station_archives(STATION);
    write_sfile(
        &fx.rea(),
        "a.S201404",
        &sfile_text(Some("20140413140001"), " 1.2", &[(STATION, "P", origin() + Duration::seconds(5))]),
    );
    // ST2 has a catalog entry but no day files
    write_sfile(
        &fx.rea(),
        "b.S201404",
        &sfile_text(Some("20140413140002"), " 3.0", &[("ST2", "P", origin() + Duration::seconds(5))]),
    );

    let mut cfg = fx.config();
    cfg.slicing.min_magnitude = Some(2.0);
    let res = resolver(&fx);
    let files = discover_source_files(&cfg.rea_path).unwrap();
    let summary = BatchDriver::new(&cfg, &res).unwrap().run(&files).unwrap();

    assert_eq!(summary.events_filtered, 1);
    assert_eq!(summary.no_picks, 1);
    assert!(!fx.out().join("20140413140001").exists());
    assert!(fx.out().join("20140413140002").join("event.stats").is_file());
    assert!(!fx.out().join("20140413140002").join("ST2.P.0").exists());
}

#[test]
fn missing_definitions_are_fatal() {
    let fx = Fixture::new(&[STATION]);
    let err: PickerError = read_all_definitions(&[fx.dir.path().join("NOPE.DEF")]).unwrap_err().into();
    assert!(matches!(err, PickerError::FatalConfiguration(_)));
}

#[test]
fn path_like_ids_never_touch_other_output() {
    let fx = Fixture::new(&[STATION]);
    fx.write_station_archives(STATION);
    let picks = [(STATION, "P", origin() + Duration::seconds(5))];
    write_sfile(&fx.rea(), "a.S201404", &sfile_text(Some(EVENT_ID), " 3.1", &picks));
    write_sfile(&fx.rea(), "b.S201404", &sfile_text(Some("."), " 3.1", &picks));
    write_sfile(&fx.rea(), "c.S201404", &sfile_text(Some(".."), " 3.1", &picks));
    write_sfile(&fx.rea(), "d.S201404", &sfile_text(Some("../x"), " 3.1", &picks));

    let cfg = fx.config();
    let res = resolver(&fx);
    let files = discover_source_files(&cfg.rea_path).unwrap();
    let summary = BatchDriver::new(&cfg, &res).unwrap().run(&files).unwrap();

    assert_eq!(summary.events_saved, 1);
    assert_eq!(summary.unreadable, 3);
    assert_eq!(summary.persistence_failures, 0);
    assert!(fx.out().join(EVENT_ID).join("ST1.P.0").join(".ST1.BHZ.P.MSEED").is_file());
    assert!(fx.dir.path().join("SEISAN.DEF").is_file());
    assert!(fx.rea().join("a.S201404").is_file());
    assert!(!fx.dir.path().join("x").exists());
}

#[test]
fn resumed_duplicate_rewrites_its_own_directory() {
    let fx = Fixture::new(&[STATION]);
    fx.write_station_archives(STATION);
    let picks = [(STATION, "P", origin() + Duration::seconds(5))];
    write_sfile(&fx.rea(), "a.S201404", &sfile_text(Some(EVENT_ID), " 3.1", &picks));
    write_sfile(&fx.rea(), "b.S201404", &sfile_text(Some(EVENT_ID), " 4.5", &picks));

    let cfg = fx.config();
    let res = resolver(&fx);
    let files = discover_source_files(&cfg.rea_path).unwrap();
    BatchDriver::new(&cfg, &res).unwrap().run(&files).unwrap();

    // died on b before its ID was recorded
    let crashed = BatchProgress {
        file_currently_parsed: Some(files[1].clone()),
        error_event_id:        None,
        finished:              false,
        ..BatchProgress::default()
    };
    write_stats(&fx.out(), &crashed).unwrap();

    let summary = BatchDriver::new(&cfg, &res).unwrap().run(&files).unwrap();
    assert_eq!(summary.events_skipped, 1);
    assert_eq!(summary.events_saved, 1);

    let first: EventDescription = read_stats(&fx.out().join(EVENT_ID)).unwrap();
    let second: EventDescription = read_stats(&fx.out().join(format!("{EVENT_ID}_1"))).unwrap();
    assert_eq!(first.magnitude, Some(3.1));
    assert_eq!(second.magnitude, Some(4.5));
    assert!(fx.out().join(EVENT_ID).join("ST1.P.0").is_dir());
    assert!(!fx.out().join(format!("{EVENT_ID}_2")).exists());
}

#[test]
fn vanished_source_file_is_counted() {
    let fx = Fixture::new(&[STATION]);
    fx.write_station_archives(STATION);
    let picks = [(STATION, "P", origin() + Duration::seconds(5))];
    write_sfile(&fx.rea(), "a.S201404", &sfile_text(Some("20140413140001"), " 3.1", &picks));
    write_sfile(&fx.rea(), "b.S201404", &sfile_text(Some(EVENT_ID), " 3.1", &picks));

    let cfg = fx.config();
    let res = resolver(&fx);
    let files = discover_source_files(&cfg.rea_path).unwrap();
    fs::remove_file(&files[0]).unwrap();

    let summary = BatchDriver::new(&cfg, &res).unwrap().run(&files).unwrap();
    assert_eq!(summary.files_seen, 2);
    assert_eq!(summary.unreadable, 1);
    assert_eq!(summary.events_saved, 1);

    let progress: BatchProgress = read_stats(&fx.out()).unwrap();
    assert!(progress.finished);
    assert_eq!(progress.last_file_parsed.as_ref(), Some(&files[1]));
}

/// Day archives at 7/3 Hz: readable, but no slice cut from them can be
/// written back as miniSEED.
fn write_unwritable_rate_archives(fx: &Fixture, station: &str) {
    for ch in common::CHANNELS {
        let tr = common::ramp(station, ch, origin() - Duration::seconds(28), 200, 1.0);
        let mut bytes = mseed::encode_trace(&tr).unwrap();
        assert_eq!(bytes.len(), mseed::RECORD_LEN);
        bytes[32..34].copy_from_slice(&7i16.to_be_bytes());
        bytes[34..36].copy_from_slice(&(-3i16).to_be_bytes());
        let path = common::archive_file(&fx.archive(), station, ch, tr.start);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, bytes).unwrap();
    }
}

#[test]
fn slice_write_failures_are_counted_and_the_run_goes_on() {
    let fx = Fixture::new(&[STATION, "ST2"]);
    fx.write_station_archives(STATION);
    write_unwritable_rate_archives(&fx, "ST2");
    let t = origin() + Duration::seconds(5);
    write_sfile(&fx.rea(), "a.S201404", &sfile_text(Some("20140413140001"), " 3.1", &[(STATION, "P", t), ("ST2", "P", t)]));
    write_sfile(&fx.rea(), "b.S201404", &sfile_text(Some(EVENT_ID), " 3.1", &[(STATION, "S", t)]));

    let mut cfg = fx.config();
    cfg.slicing.min_slice_samples = 1;
    let res = resolver(&fx);
    let files = discover_source_files(&cfg.rea_path).unwrap();
    let summary = BatchDriver::new(&cfg, &res).unwrap().run(&files).unwrap();

    assert_eq!(summary.events_saved, 2);
    assert_eq!(summary.groups_saved, 2);
    assert_eq!(summary.persistence_failures, 3);
    let event_dir = fx.out().join("20140413140001");
    assert!(event_dir.join("ST1.P.0").is_dir());
    assert!(!event_dir.join("ST2.P.0").exists());
    assert!(fx.out().join(EVENT_ID).join("ST1.S.0").is_dir());
}
