//! End-to-end subset builds over synthetic disc folders

mod common;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use common::{export_of, song, TestFixture};
use discmerge_core::xml::XmlDocument;
use discmerge_core::{
    validate_manifest, BuildOptions, BuildPhase, BuildProgress, Error, ErrorKind, ExportDataset,
    SubsetBuilder,
};

fn ids(list: &[u32]) -> BTreeSet<u32> {
    list.iter().copied().collect()
}

fn cover_texture(export: &std::path::Path, song_id: u32) -> Option<String> {
    let doc = XmlDocument::read(&export.join("covers.xml")).unwrap();
    let name = format!("cover_{}", song_id);
    doc.root
        .descendants()
        .find(|e| e.name == "TPAGE_BIT" && e.attr("NAME") == Some(name.as_str()))
        .and_then(|e| e.attr("TEXTURE").map(str::to_string))
}

/// Base with songs 1 and 3, donor "Pop" with song 2
fn base_and_pop(fixture: &TestFixture) {
    fixture.create_disc("Base", &[song(1, "Alpha", 60), song(3, "Alpha", 64)]);
    fixture.create_disc("Pop", &[song(2, "Beta", 67)]);
}

#[test]
fn test_subset_build_end_to_end() {
    let fixture = TestFixture::new();
    base_and_pop(&fixture);
    let out = fixture.path("Mix");

    let phases = Arc::new(Mutex::new(Vec::new()));
    let seen = phases.clone();
    let report = SubsetBuilder::new(fixture.open("Base", "Base"), vec![fixture.open("Pop", "Pop")])
        .with_options(BuildOptions::default().with_target_version(6))
        .with_progress_callback(Box::new(move |p: BuildProgress| {
            seen.lock().unwrap().push(p.phase)
        }))
        .build(&out, &ids(&[1, 2]))
        .unwrap();

    assert_eq!(report.output, out);
    assert_eq!(report.merged_song_count, 2);
    assert!(report.backup.is_none());
    assert_eq!(report.imported_by_source.get("Base"), Some(&vec![1]));
    assert_eq!(report.imported_by_source.get("Pop"), Some(&vec![2]));
    assert_eq!(report.texture_pages_copied, 1);

    // Disc layout is kept, packed archives and unselected songs are not
    let export = export_of(&out);
    assert!(out.join("PS3_GAME/PARAM.SFO").is_file());
    assert!(!out.join("PS3_GAME/USRDIR/pack_ee.pkd").exists());
    assert!(export.join("1/melody_6.xml").is_file());
    assert!(export.join("2/melody_6.xml").is_file());
    assert!(!export.join("3").exists());
    assert!(!fixture.path("Mix._BUILDING_tmp").exists());

    // Donor page 0 lands after the base's page 0
    assert_eq!(cover_texture(&export, 1).as_deref(), Some("page_0"));
    assert_eq!(cover_texture(&export, 2).as_deref(), Some("page_1"));
    assert_eq!(
        fs::read_to_string(export.join("textures/page_1.jpg")).unwrap(),
        "Pop page 0"
    );

    let config = XmlDocument::read(&export.join("config.xml")).unwrap();
    validate_manifest(&config, 6).unwrap();

    let rebuilt = ExportDataset::open_path(&out, "Mix").unwrap();
    assert_eq!(rebuilt.max_bank, 6);
    assert_eq!(rebuilt.song_ids(), ids(&[1, 2]));
    assert_eq!(rebuilt.cache_song_ids().unwrap(), Some(ids(&[1, 2])));
    for bank in 1..=6 {
        assert!(export.join(format!("songs_{}_0.xml", bank)).is_file());
        assert!(export.join(format!("melodies_{}.chc", bank)).is_file());
    }

    // Donor act gets the next free ID
    let beta = rebuilt.acts().iter().find(|a| a.name == "Beta").unwrap();
    assert_eq!(beta.id, 2);
    assert_eq!(rebuilt.song(2).unwrap().performed_by(), Some(2));
    assert_eq!(rebuilt.song(1).unwrap().performed_by(), Some(1));

    let phases = phases.lock().unwrap();
    assert_eq!(phases.first(), Some(&BuildPhase::Preflight));
    assert_eq!(phases.last(), Some(&BuildPhase::Done));
}

#[test]
fn test_songlists_follow_selection() {
    let fixture = TestFixture::new();
    base_and_pop(&fixture);
    let out = fixture.path("Mix");

    SubsetBuilder::new(fixture.open("Base", "Base"), vec![fixture.open("Pop", "Pop")])
        .build(&out, &ids(&[1, 2]))
        .unwrap();

    let doc = XmlDocument::read(&export_of(&out).join("songlists_6.xml")).unwrap();
    let refs: Vec<u32> = doc
        .root
        .descendants()
        .filter(|e| e.name == "SONG_REF")
        .filter_map(|e| e.attr_u32("ID"))
        .collect();
    assert!(refs.contains(&1));
    assert!(refs.contains(&2));
    assert!(!refs.contains(&3));
}

#[test]
fn test_rebuild_keeps_backup() {
    let fixture = TestFixture::new();
    base_and_pop(&fixture);
    let out = fixture.path("Mix");
    let builder = SubsetBuilder::new(fixture.open("Base", "Base"), vec![fixture.open("Pop", "Pop")])
        .allow_overwrite(true);

    builder.build(&out, &ids(&[1])).unwrap();
    let report = builder.build(&out, &ids(&[1, 2])).unwrap();

    let backup = report.backup.expect("previous output kept");
    assert!(backup
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("Mix.__BACKUP_"));
    assert!(export_of(&backup).join("1").is_dir());
    assert!(!export_of(&backup).join("2").exists());
    assert!(export_of(&out).join("2").is_dir());
}

#[test]
fn test_existing_output_refused_without_overwrite() {
    let fixture = TestFixture::new();
    base_and_pop(&fixture);
    let out = fixture.path("Mix");
    fs::create_dir_all(&out).unwrap();

    let err = SubsetBuilder::new(fixture.open("Base", "Base"), vec![])
        .build(&out, &ids(&[1]))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OverwriteRefused);
}

#[test]
fn test_unrelated_folder_not_overwritten() {
    let fixture = TestFixture::new();
    base_and_pop(&fixture);
    let out = fixture.path("Documents");
    fs::create_dir_all(&out).unwrap();
    fs::write(out.join("thesis.txt"), "important").unwrap();

    let err = SubsetBuilder::new(fixture.open("Base", "Base"), vec![])
        .allow_overwrite(true)
        .build(&out, &ids(&[1]))
        .unwrap_err();

    assert!(matches!(err, Error::OverwriteRefused { .. }));
    assert_eq!(fs::read_to_string(out.join("thesis.txt")).unwrap(), "important");
}

#[test]
fn test_input_folder_refused_as_output() {
    let fixture = TestFixture::new();
    base_and_pop(&fixture);
    let base_disc = fixture.path("Base");

    let err = SubsetBuilder::new(fixture.open("Base", "Base"), vec![])
        .allow_overwrite(true)
        .build(&base_disc, &ids(&[1]))
        .unwrap_err();

    assert!(matches!(err, Error::OverwriteRefused { .. }));
    assert!(export_of(&base_disc).join("3").is_dir());
}

#[test]
fn test_cancelled_build_is_preserved() {
    let fixture = TestFixture::new();
    base_and_pop(&fixture);
    let out = fixture.path("Mix");

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let err = SubsetBuilder::new(fixture.open("Base", "Base"), vec![fixture.open("Pop", "Pop")])
        .with_cancel_check(Box::new(move || counter.fetch_add(1, Ordering::SeqCst) >= 1))
        .build(&out, &ids(&[1, 2]))
        .unwrap_err();

    let (partial_output, reason) = match err {
        Error::Cancelled { partial_output, reason } => (partial_output, reason),
        other => panic!("expected cancellation, got {:?}", other),
    };
    assert_eq!(reason, "Cancelled after base copy");
    assert!(partial_output.to_string_lossy().ends_with("Mix.__CANCELLED"));
    let note = fs::read_to_string(partial_output.join("__BUILD_CANCELLED__.txt")).unwrap();
    assert!(note.contains("Reason: Cancelled after base copy"));
    assert!(!out.exists());
    assert!(!fixture.path("Mix._BUILDING_tmp").exists());
}

#[test]
fn test_fast_update_leaves_backup_untouched() {
    let fixture = TestFixture::new();
    base_and_pop(&fixture);
    let out = fixture.path("Mix");
    let builder = SubsetBuilder::new(fixture.open("Base", "Base"), vec![fixture.open("Pop", "Pop")])
        .allow_overwrite(true)
        .fast_update(true);

    builder.build(&out, &ids(&[1, 2])).unwrap();
    let report = builder.build(&out, &ids(&[1, 2])).unwrap();

    let backup = report.backup.expect("fast update keeps the previous output");
    assert_eq!(cover_texture(&export_of(&backup), 2).as_deref(), Some("page_1"));
    assert_eq!(cover_texture(&export_of(&out), 2).as_deref(), Some("page_2"));

    let rebuilt = ExportDataset::open_path(&out, "Mix").unwrap();
    assert_eq!(rebuilt.cache_song_ids().unwrap(), Some(ids(&[1, 2])));
}

#[test]
fn test_donor_conflict_needs_a_route() {
    let fixture = TestFixture::new();
    fixture.create_disc("Base", &[song(1, "Alpha", 60)]);
    fixture.create_disc("A", &[song(9, "Gamma", 50)]);
    fixture.create_disc("B", &[song(9, "Gamma", 52)]);
    let out = fixture.path("Mix");
    let selected = ids(&[1, 9]);

    let donors = || vec![fixture.open("A", "A"), fixture.open("B", "B")];
    let err = SubsetBuilder::new(fixture.open("Base", "Base"), donors())
        .build(&out, &selected)
        .unwrap_err();
    match err {
        Error::UnresolvedDuplicate { song_ids } => assert_eq!(song_ids, vec![9]),
        other => panic!("expected unresolved duplicate, got {:?}", other),
    }
    assert!(!out.exists());

    let routes: BTreeMap<u32, String> = [(9, "B".to_string())].into_iter().collect();
    let report = SubsetBuilder::new(fixture.open("Base", "Base"), donors())
        .with_preferred_sources(routes)
        .build(&out, &selected)
        .unwrap();
    assert_eq!(report.imported_by_source.get("B"), Some(&vec![9]));
    assert!(report.imported_by_source.get("A").is_none());

    let melody = fs::read_to_string(export_of(&out).join("9/melody_1.xml")).unwrap();
    assert!(melody.contains("MidiNote=\"52\""));
}

#[test]
fn test_routing_errors() {
    let fixture = TestFixture::new();
    base_and_pop(&fixture);
    let out = fixture.path("Mix");

    let routes: BTreeMap<u32, String> = [(2, "Rock".to_string())].into_iter().collect();
    let err = SubsetBuilder::new(fixture.open("Base", "Base"), vec![fixture.open("Pop", "Pop")])
        .with_preferred_sources(routes)
        .build(&out, &ids(&[2]))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOptions);

    let err = SubsetBuilder::new(fixture.open("Base", "Base"), vec![fixture.open("Pop", "Pop")])
        .build(&out, &ids(&[1, 77]))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingReference);

    let err = SubsetBuilder::new(fixture.open("Base", "Base"), vec![])
        .build(&out, &BTreeSet::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOptions);
    assert!(!out.exists());
}
