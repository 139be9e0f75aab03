//! Snapshot round-trip and auto-save tests.

use std::io::{Read, Write as IoWrite};
use std::path::Path;

use salis_engine::arch::v1::SalisV1;
use salis_engine::{Config, Engine, EngineError, MutationKind};

fn write_ancestor(lines: &[&str]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
    file.flush().unwrap();
    file
}

fn sim_config(anc: &Path) -> Config {
    Config {
        core_count: 2,
        mvec_size: 64,
        sync_interval: 4,
        seed: 7,
        muta_range: 256,
        mutation: MutationKind::FlipBit,
        anc_list: vec![anc.to_str().unwrap().into(), "_".into()],
        ..Config::default()
    }
}

fn read_bytes(path: &Path) -> Vec<u8> {
    let mut bytes = Vec::new();
    std::fs::File::open(path)
        .unwrap()
        .read_to_end(&mut bytes)
        .unwrap();
    bytes
}

#[test]
fn test_save_load_round_trip_is_byte_identical() {
    let anc = write_ancestor(&["loka", "incn", "incn", "jmpb", "keya"]);
    let config = sim_config(anc.path());
    let dir = tempfile::tempdir().unwrap();

    let mut engine = Engine::<SalisV1>::new(config.clone()).unwrap();
    engine.step(2 * 4).unwrap();

    let first = dir.path().join("first.sim");
    engine.save(&first).unwrap();

    let loaded = Engine::<SalisV1>::load_from(config, &first).unwrap();
    assert_eq!(loaded.steps(), 8);
    assert_eq!(loaded.syncs(), 2);

    let second = dir.path().join("second.sim");
    loaded.save(&second).unwrap();
    assert_eq!(read_bytes(&first), read_bytes(&second));
}

#[test]
fn test_loaded_state_observes_all_fields() {
    let anc = write_ancestor(&["unit", "incn", "jmpb", "keya"]);
    let config = sim_config(anc.path());
    let dir = tempfile::tempdir().unwrap();

    let mut engine = Engine::<SalisV1>::new(config.clone()).unwrap();
    engine.step(9).unwrap();
    let path = dir.path().join("state.sim");
    engine.save(&path).unwrap();

    let mut loaded = Engine::<SalisV1>::load_from(config, &path).unwrap();
    // a zero-step advance still re-validates every invariant
    loaded.step(0).unwrap();

    for cix in 0..engine.core_count() {
        let a = engine.core(cix);
        let b = loaded.core(cix);
        assert_eq!(a.prng().state(), b.prng().state());
        assert_eq!(a.mem().mall(), b.mem().mall());
        assert_eq!(a.procs().pnum(), b.procs().pnum());
        assert_eq!(a.procs().pcur(), b.procs().pcur());
        assert_eq!(a.procs().psli(), b.procs().psli());
        assert_eq!(a.procs().ncyc(), b.procs().ncyc());
        assert_eq!(a.ipc().ivpt(), b.ipc().ivpt());
        for addr in 0..a.mem().len() {
            assert_eq!(a.mem().get_byte(addr), b.mem().get_byte(addr));
        }
        for pix in a.procs().pfst()..=a.procs().plst() {
            assert_eq!(a.procs().get(pix), b.procs().get(pix));
        }
    }
}

#[test]
fn test_resumed_run_matches_uninterrupted_run() {
    let anc = write_ancestor(&["loka", "incn", "incn", "jmpb", "keya"]);
    let config = sim_config(anc.path());
    let dir = tempfile::tempdir().unwrap();

    let mut uninterrupted = Engine::<SalisV1>::new(config.clone()).unwrap();
    uninterrupted.step(20).unwrap();

    let mut first_half = Engine::<SalisV1>::new(config.clone()).unwrap();
    first_half.step(11).unwrap();
    let checkpoint = dir.path().join("checkpoint.sim");
    first_half.save(&checkpoint).unwrap();

    let mut resumed = Engine::<SalisV1>::load_from(config, &checkpoint).unwrap();
    resumed.step(9).unwrap();

    let full = dir.path().join("full.sim");
    let rejoined = dir.path().join("rejoined.sim");
    uninterrupted.save(&full).unwrap();
    resumed.save(&rejoined).unwrap();
    assert_eq!(read_bytes(&full), read_bytes(&rejoined));
}

#[test]
fn test_auto_save_fires_on_interval() {
    let anc = write_ancestor(&["incn"]);
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        autosave_interval: 4,
        sim_path: dir.path().join("salis.sim"),
        ..sim_config(anc.path())
    };

    let mut engine = Engine::<SalisV1>::new(config.clone()).unwrap();
    let initial = dir.path().join("salis.sim-0x0000000000000000");
    assert!(initial.exists(), "initial snapshot missing");

    engine.step(4).unwrap();
    let at_four = dir.path().join("salis.sim-0x0000000000000004");
    assert!(at_four.exists(), "interval snapshot missing");

    let loaded = Engine::<SalisV1>::load_from(config, &at_four).unwrap();
    assert_eq!(loaded.steps(), 4);
    assert_eq!(loaded.syncs(), 1);
}

#[test]
fn test_load_rejects_mismatched_geometry() {
    let anc = write_ancestor(&["incn"]);
    let config = sim_config(anc.path());
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("geom.sim");

    let engine = Engine::<SalisV1>::new(config.clone()).unwrap();
    engine.save(&path).unwrap();

    let mut other = config.clone();
    other.mvec_size = 128;
    assert!(matches!(
        Engine::<SalisV1>::load_from(other, &path),
        Err(EngineError::SnapshotFormat(_))
    ));

    let mut other = config;
    other.sync_interval = 8;
    assert!(matches!(
        Engine::<SalisV1>::load_from(other, &path),
        Err(EngineError::SnapshotFormat(_))
    ));
}

#[test]
fn test_load_rejects_truncated_snapshot() {
    let anc = write_ancestor(&["incn"]);
    let config = sim_config(anc.path());
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trunc.sim");

    let engine = Engine::<SalisV1>::new(config.clone()).unwrap();
    engine.save(&path).unwrap();

    let bytes = read_bytes(&path);
    std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
    assert!(Engine::<SalisV1>::load_from(config, &path).is_err());
}
