//! Orchestrator scenarios against an in-memory destination.

mod util;

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::path::Path;

use patchkeep::core::autopatch::AutoPatchConfig;
use patchkeep::core::destination::DestinationPatchContract;
use patchkeep::core::error::{RegenError, RegenResult, exit_code_for};
use patchkeep::core::manifest::HashAlgorithm;
use patchkeep::core::origin::FolderOrigin;
use patchkeep::core::patch::FilePatch;
use patchkeep::core::record::ConsistencyRecord;
use patchkeep::core::regenerate::{
    ImportFallback, Migration, RegenerateRequest, Regenerator, Resolution, TrackingMode,
};
use patchkeep::core::tree::{self, TreeHandle};
use patchkeep::infra::signal::CancelToken;
use patchkeep::infra::walk::FileSet;
use tempfile::TempDir;

use util::{snapshot, write_text_tree};

const RECORD: &str = "meta/record.json";

type Files = BTreeMap<String, Vec<u8>>;

/// Destination whose revisions are plain maps.
#[derive(Default)]
struct FakeDestination
{
    revisions: RefCell<BTreeMap<String, Files>>,
    target: Option<String>,
    baseline: Option<String>,
    import_baseline: Option<String>,
    tree_reads: Cell<usize>,
    updates: RefCell<Vec<(String, Files)>>,
}

impl FakeDestination
{
    fn with_revision(
        self,
        name: &str,
        files: &[(&str, &str)],
    ) -> Self
    {
        let files = files
            .iter()
            .map(|(p, b)| (p.to_string(), b.as_bytes().to_vec()))
            .collect();
        self.revisions
            .borrow_mut()
            .insert(name.to_string(), files);
        self
    }

    fn revision(
        &self,
        name: &str,
    ) -> Files
    {
        self.revisions
            .borrow()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    fn set_file(
        &self,
        revision: &str,
        path: &str,
        bytes: Vec<u8>,
    )
    {
        self.revisions
            .borrow_mut()
            .entry(revision.to_string())
            .or_default()
            .insert(path.to_string(), bytes);
    }
}

impl DestinationPatchContract for FakeDestination
{
    fn name(&self) -> &'static str
    {
        "fake"
    }

    fn read_tree(
        &self,
        revision: &str,
        files: &FileSet,
        into: &Path,
    ) -> RegenResult<TreeHandle>
    {
        self.tree_reads
            .set(self.tree_reads.get() + 1);
        std::fs::create_dir_all(into).map_err(|e| RegenError::io("create", into, e))?;
        for (path, bytes) in self.revision(revision)
        {
            if files.matches(&path)
            {
                tree::write_file(into, &path, &bytes)?;
            }
        }
        TreeHandle::scan(into, files)
    }

    fn exists(
        &self,
        revision: &str,
        path: &str,
    ) -> RegenResult<bool>
    {
        Ok(self
            .revision(revision)
            .contains_key(path))
    }

    fn read_file(
        &self,
        revision: &str,
        path: &str,
    ) -> RegenResult<Option<Vec<u8>>>
    {
        Ok(self
            .revision(revision)
            .get(path)
            .cloned())
    }

    fn infer_baseline(&self) -> RegenResult<Option<String>>
    {
        Ok(self
            .baseline
            .clone())
    }

    fn infer_target(&self) -> RegenResult<Option<String>>
    {
        Ok(self
            .target
            .clone())
    }

    fn infer_import_baseline(
        &self,
        _target: &str,
        _workdir: &Path,
    ) -> RegenResult<Option<String>>
    {
        Ok(self
            .import_baseline
            .clone())
    }

    fn update_change(
        &self,
        target: &str,
        updated: &TreeHandle,
        files: &FileSet,
    ) -> RegenResult<()>
    {
        let mut next: Files = self
            .revision(target)
            .into_iter()
            .filter(|(p, _)| !files.matches(p))
            .collect();
        let staged: Files = snapshot(&updated.root)
            .into_iter()
            .filter(|(p, _)| files.matches(p))
            .collect();
        next.extend(staged.clone());

        self.revisions
            .borrow_mut()
            .insert(target.to_string(), next);
        self.updates
            .borrow_mut()
            .push((target.to_string(), staged));
        Ok(())
    }
}

fn migration(record: bool) -> Migration
{
    Migration {
        name: "lib".into(),
        destination_files: FileSet::all(),
        record_path: record.then(|| RECORD.to_string()),
        autopatch: None,
        hash_algorithm: HashAlgorithm::Blake3,
        import_fallback: ImportFallback::Latest,
    }
}

/// Record bytes for a pristine import with no edits yet.
fn bootstrap_record(
    migration: &Migration,
    pristine: &[(&str, &str)],
) -> String
{
    let tmp = TempDir::new().unwrap();
    write_text_tree(tmp.path(), pristine);
    let files = migration
        .diff_files()
        .unwrap();
    let record = ConsistencyRecord::generate(tmp.path(), tmp.path(), &files, HashAlgorithm::Blake3).unwrap();
    String::from_utf8(record.to_bytes().unwrap()).unwrap()
}

fn request(
    baseline: &str,
    target: &str,
) -> RegenerateRequest
{
    RegenerateRequest {
        baseline_ref: Some(baseline.into()),
        target_ref: Some(target.into()),
        ..Default::default()
    }
}

fn committed_record(
    dest: &FakeDestination,
    target: &str,
) -> ConsistencyRecord
{
    let bytes = dest
        .revision(target)
        .remove(RECORD)
        .expect("record committed");
    ConsistencyRecord::from_bytes(&bytes).unwrap()
}

fn detached(dest: &FakeDestination) -> Regenerator<'_>
{
    Regenerator::new(dest).with_cancel(CancelToken::detached())
}

#[test]
fn clean_regeneration_records_the_edit()
{
    let migration = migration(true);
    let record = bootstrap_record(&migration, &[("a.txt", "1")]);
    let dest = FakeDestination::default()
        .with_revision("base", &[("a.txt", "1"), (RECORD, record.as_str())])
        .with_revision("change", &[("a.txt", "2"), (RECORD, record.as_str())]);

    let report = detached(&dest)
        .run(&migration, &request("base", "change"))
        .unwrap();
    assert_eq!(report.mode, TrackingMode::ConsistencyRecord);
    assert_eq!(report.record_patches, Some(1));
    assert!(report.committed);

    let record = committed_record(&dest, "change");
    assert_eq!(record.patches().len(), 1);
    assert_eq!(record.patches()[0].path(), "a.txt");
    assert_eq!(record.manifest().len(), 1);
    assert_eq!(
        record
            .pristine_entry("a.txt")
            .unwrap()
            .digest,
        HashAlgorithm::Blake3.digest(b"1")
    );

    // Reversing on the target yields the pristine tree
    let target = TempDir::new().unwrap();
    write_text_tree(target.path(), &[("a.txt", "2")]);
    record
        .reverse_apply(target.path())
        .unwrap();
    assert_eq!(std::fs::read(target.path().join("a.txt")).unwrap(), b"1");
}

#[test]
fn previous_edits_are_kept_when_the_reviewer_edits_again()
{
    let migration = migration(true);
    let pristine = [("a.txt", "one\ntwo\nthree\n"), ("b.txt", "bee\n")];

    // Round one: the baseline is the import, the change adds an edit
    let record = bootstrap_record(&migration, &pristine);
    let dest = FakeDestination::default()
        .with_revision("import", &[pristine[0], pristine[1], (RECORD, record.as_str())])
        .with_revision("change", &[("a.txt", "one\nTWO\nthree\n"), pristine[1], (RECORD, record.as_str())]);
    detached(&dest)
        .run(&migration, &request("import", "change"))
        .unwrap();

    // Round two: the committed change becomes the baseline of a new edit
    let committed = dest.revision("change");
    dest.revisions
        .borrow_mut()
        .insert("next".into(), committed);
    dest.set_file("next", "b.txt", b"BEE\n".to_vec());
    detached(&dest)
        .run(&migration, &request("change", "next"))
        .unwrap();

    let record = committed_record(&dest, "next");
    let paths: Vec<&str> = record
        .patches()
        .iter()
        .map(|p| p.path())
        .collect();
    assert_eq!(paths, vec!["a.txt", "b.txt"]);
    assert_eq!(
        record
            .pristine_entry("a.txt")
            .unwrap()
            .digest,
        HashAlgorithm::Blake3.digest(b"one\ntwo\nthree\n")
    );
}

#[test]
fn missing_record_fails_before_reading_trees()
{
    let migration = migration(true);
    let dest = FakeDestination::default()
        .with_revision("base", &[("a.txt", "1")])
        .with_revision("change", &[("a.txt", "2")]);

    let err = detached(&dest)
        .run(&migration, &request("base", "change"))
        .unwrap_err();
    assert!(matches!(err, RegenError::MissingConsistencyRecord { ref baseline, .. } if baseline == "base"));
    assert_eq!(exit_code_for(&err), 3);
    assert_eq!(dest.tree_reads.get(), 0);
    assert!(
        dest.updates
            .borrow()
            .is_empty()
    );
}

#[test]
fn unresolvable_target_is_a_configuration_error()
{
    let migration = migration(true);
    let dest = FakeDestination::default();

    let err = detached(&dest)
        .run(&migration, &RegenerateRequest::default())
        .unwrap_err();
    assert!(matches!(err, RegenError::UnresolvableReference { .. }));
    assert_eq!(exit_code_for(&err), 3);
    assert_eq!(dest.tree_reads.get(), 0);
}

#[test]
fn inferred_references_are_used_when_none_are_given()
{
    let migration = migration(true);
    let record = bootstrap_record(&migration, &[("a.txt", "1")]);
    let dest = FakeDestination {
        target: Some("change".into()),
        baseline: Some("base".into()),
        ..Default::default()
    }
    .with_revision("base", &[("a.txt", "1"), (RECORD, record.as_str())])
    .with_revision("change", &[("a.txt", "2"), (RECORD, record.as_str())]);

    let report = detached(&dest)
        .run(&migration, &RegenerateRequest::default())
        .unwrap();
    assert_eq!(report.target, Resolution::Inferred("change".into()));
    assert_eq!(report.baseline, Resolution::Inferred("base".into()));
}

#[test]
fn missing_baseline_needs_the_import_flag()
{
    let migration = migration(true);
    let dest = FakeDestination::default().with_revision("change", &[("a.txt", "2")]);

    let err = detached(&dest)
        .run(&migration, &RegenerateRequest { target_ref: Some("change".into()), ..Default::default() })
        .unwrap_err();
    assert!(matches!(err, RegenError::UnresolvableReference { .. }), "{err:?}");
}

#[test]
fn regeneration_is_idempotent()
{
    let migration = migration(true);
    let record = bootstrap_record(&migration, &[("a.txt", "x\ny\n"), ("bin.dat", "plain")]);
    let dest = FakeDestination::default()
        .with_revision("base", &[("a.txt", "x\ny\n"), ("bin.dat", "plain"), (RECORD, record.as_str())])
        .with_revision("change", &[("a.txt", "x\nz\n"), (RECORD, record.as_str())]);
    dest.set_file("change", "bin.dat", vec![0, 159, 146, 150]);

    detached(&dest)
        .run(&migration, &request("base", "change"))
        .unwrap();
    let first = dest.revision("change")[RECORD].clone();

    detached(&dest)
        .run(&migration, &request("base", "change"))
        .unwrap();
    let second = dest.revision("change")[RECORD].clone();

    assert_eq!(first, second);
    assert_eq!(
        dest.updates
            .borrow()
            .len(),
        2
    );
}

#[test]
fn paths_outside_the_file_set_are_never_touched()
{
    let mut migration = migration(true);
    migration.destination_files = FileSet::new(&["src/**".into(), "meta/**".into()], &[]).unwrap();
    migration.autopatch = Some(AutoPatchConfig { directory_prefix: "meta/patches".into(), ..Default::default() });

    let record = bootstrap_record(&migration, &[("src/a.rs", "fn a() {}\n")]);
    let dest = FakeDestination::default()
        .with_revision("base", &[("src/a.rs", "fn a() {}\n"), ("docs/x.md", "old"), (RECORD, record.as_str())])
        .with_revision("change", &[("src/a.rs", "fn a() { b() }\n"), ("docs/x.md", "new"), (RECORD, record.as_str())]);

    let report = detached(&dest)
        .run(&migration, &request("base", "change"))
        .unwrap();
    assert_eq!(report.autopatches, vec!["meta/patches/src/a.rs.patch"]);

    let updates = dest.updates.borrow();
    let (_, staged) = &updates[0];
    assert!(
        staged
            .keys()
            .all(|p| p.starts_with("src/") || p.starts_with("meta/")),
        "{staged:?}"
    );
    assert_eq!(dest.revision("change")["docs/x.md"], b"new");

    let record = committed_record(&dest, "change");
    assert!(
        record
            .patches()
            .iter()
            .all(|p| p.path().starts_with("src/"))
    );
}

#[test]
fn drifted_baseline_aborts_without_commit()
{
    let migration = migration(true);
    let record = bootstrap_record(&migration, &[("a.txt", "1"), ("b.txt", "b")]);
    let dest = FakeDestination::default()
        .with_revision("base", &[("a.txt", "1"), ("b.txt", "changed behind our back"), (RECORD, record.as_str())])
        .with_revision("change", &[("a.txt", "2"), ("b.txt", "b"), (RECORD, record.as_str())]);

    let err = detached(&dest)
        .run(&migration, &request("base", "change"))
        .unwrap_err();
    match &err
    {
        RegenError::Drift(report) => assert_eq!(report.paths().collect::<Vec<_>>(), vec!["b.txt"]),
        other => panic!("expected drift, got {other:?}"),
    }
    assert_eq!(exit_code_for(&err), 2);
    assert!(
        dest.updates
            .borrow()
            .is_empty()
    );
}

#[test]
fn dry_run_leaves_the_destination_alone()
{
    let migration = migration(true);
    let record = bootstrap_record(&migration, &[("a.txt", "1")]);
    let dest = FakeDestination::default()
        .with_revision("base", &[("a.txt", "1"), (RECORD, record.as_str())])
        .with_revision("change", &[("a.txt", "2"), (RECORD, record.as_str())]);

    let report = detached(&dest)
        .dry_run(true)
        .run(&migration, &request("base", "change"))
        .unwrap();
    assert!(!report.committed);
    assert_eq!(report.record_patches, Some(1));
    assert!(
        dest.updates
            .borrow()
            .is_empty()
    );
}

#[test]
fn cancellation_aborts_before_commit()
{
    let migration = migration(true);
    let record = bootstrap_record(&migration, &[("a.txt", "1")]);
    let dest = FakeDestination::default()
        .with_revision("base", &[("a.txt", "1"), (RECORD, record.as_str())])
        .with_revision("change", &[("a.txt", "2"), (RECORD, record.as_str())]);

    let token = CancelToken::detached();
    token.cancel();
    let err = Regenerator::new(&dest)
        .with_cancel(token)
        .run(&migration, &request("base", "change"))
        .unwrap_err();
    assert!(matches!(err, RegenError::Cancelled));
    assert!(
        dest.updates
            .borrow()
            .is_empty()
    );
}

#[test]
fn workspace_is_removed_on_every_exit_path()
{
    let workdir = TempDir::new().unwrap();
    let migration = migration(true);
    let record = bootstrap_record(&migration, &[("a.txt", "1")]);
    let dest = FakeDestination::default()
        .with_revision("base", &[("a.txt", "1"), (RECORD, record.as_str())])
        .with_revision("change", &[("a.txt", "2"), (RECORD, record.as_str())])
        .with_revision("drifted", &[("a.txt", "?"), (RECORD, record.as_str())]);

    detached(&dest)
        .with_workdir(workdir.path())
        .run(&migration, &request("base", "change"))
        .unwrap();
    detached(&dest)
        .with_workdir(workdir.path())
        .run(&migration, &request("drifted", "change"))
        .unwrap_err();

    assert_eq!(std::fs::read_dir(workdir.path()).unwrap().count(), 0);
}

#[test]
fn import_baseline_mode_diffs_against_a_fresh_import()
{
    let origin = TempDir::new().unwrap();
    write_text_tree(origin.path(), &[("a.txt", "1\n2\n3\n"), ("b.txt", "same\n")]);
    let pipeline = FolderOrigin::new(origin.path(), FileSet::all());

    let mut migration = migration(false);
    migration.autopatch = Some(AutoPatchConfig { directory_prefix: "patches".into(), ..Default::default() });
    let dest = FakeDestination { target: Some("change".into()), ..Default::default() }
        .with_revision("change", &[("a.txt", "1\ntwo\n3\n"), ("b.txt", "same\n")]);

    let report = detached(&dest)
        .with_pipeline(&pipeline)
        .run(&migration, &RegenerateRequest::default())
        .unwrap();
    assert_eq!(report.mode, TrackingMode::ImportBaseline);
    assert_eq!(report.baseline, Resolution::Fallback("current".into()));
    assert_eq!(report.autopatches, vec!["patches/a.txt.patch"]);
    assert!(report.record_patches.is_none());

    let patch = String::from_utf8(dest.revision("change")["patches/a.txt.patch"].clone()).unwrap();
    let parsed = FilePatch::parse("a.txt", &patch).unwrap();
    assert_eq!(parsed.apply(Some("1\n2\n3\n")).unwrap().as_deref(), Some("1\ntwo\n3\n"));
}

#[test]
fn import_flag_with_a_record_path_bootstraps_the_record()
{
    let origin = TempDir::new().unwrap();
    write_text_tree(origin.path(), &[("a.txt", "1")]);
    let pipeline = FolderOrigin::new(origin.path(), FileSet::all());

    let migration = migration(true);
    let dest = FakeDestination::default().with_revision("change", &[("a.txt", "2")]);
    let req = RegenerateRequest {
        target_ref: Some("change".into()),
        source_ref: Some("current".into()),
        use_import_baseline: true,
        ..Default::default()
    };

    let report = detached(&dest)
        .with_pipeline(&pipeline)
        .run(&migration, &req)
        .unwrap();
    assert_eq!(report.mode, TrackingMode::ImportBaseline);
    assert_eq!(report.baseline, Resolution::Explicit("current".into()));

    let record = committed_record(&dest, "change");
    assert_eq!(record.patches().len(), 1);
}

#[test]
fn import_fallback_can_be_disabled()
{
    let origin = TempDir::new().unwrap();
    let pipeline = FolderOrigin::new(origin.path(), FileSet::all());

    let mut migration = migration(false);
    migration.import_fallback = ImportFallback::Fail;
    let dest = FakeDestination { target: Some("change".into()), ..Default::default() }
        .with_revision("change", &[("a.txt", "2")]);

    let err = detached(&dest)
        .with_pipeline(&pipeline)
        .run(&migration, &RegenerateRequest::default())
        .unwrap_err();
    assert!(matches!(err, RegenError::UnresolvableReference { .. }));
    assert_eq!(dest.tree_reads.get(), 0);
}
