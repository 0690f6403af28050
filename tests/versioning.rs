//! Version semantics: snapshot isolation, commit and rollback, load
//! gating, NSEC3 parameter handling, and re-sign scheduling.

use std::sync::Arc;

use zonedb::base::{Class, Name, Rtype};
use zonedb::db::{
    AddOutcome, FindOpts, FindOutcome, LoadError, Rrset, Subtracted,
    VersionError, WhichTree, ZoneDb, ZoneKind,
};
use zonedb::runtime::Runtime;

fn name(s: &str) -> Name {
    s.parse().unwrap()
}

fn new_db(origin: &str) -> ZoneDb {
    ZoneDb::new(
        Arc::new(Runtime::with_seed(11)),
        name(origin),
        Class::IN,
        ZoneKind::Authoritative,
    )
}

fn rrset(rtype: Rtype, rdatas: &[&[u8]]) -> Rrset {
    let mut rrset = Rrset::new(rtype, 300);
    for rdata in rdatas {
        rrset.push_rdata(rdata);
    }
    rrset
}

fn soa_rdata() -> Vec<u8> {
    let mut rdata = name("ns1.example.").as_wire().to_vec();
    rdata.extend_from_slice(name("host.example.").as_wire());
    rdata.extend_from_slice(&[0; 20]);
    rdata
}

fn loaded_db() -> ZoneDb {
    let db = new_db("example.");
    let load = db.begin_load().unwrap();
    load.add(&name("example."), &rrset(Rtype::SOA, &[&soa_rdata()]))
        .unwrap();
    load.add(
        &name("www.example."),
        &rrset(Rtype::A, &[&[192, 0, 2, 1]]),
    )
    .unwrap();
    load.finish().unwrap();
    db
}

fn txt_at(db: &ZoneDb, version: &zonedb::db::VersionHandle) -> Option<Vec<u8>> {
    let answer = db
        .find(
            &name("www.example."),
            Some(version),
            Rtype::TXT,
            FindOpts::default(),
        )
        .unwrap();
    match answer.outcome {
        FindOutcome::Success => {
            Some(answer.rdataset.unwrap().iter().next().unwrap().to_vec())
        }
        _ => None,
    }
}

#[test]
fn readers_keep_their_snapshot_across_commits() {
    let db = loaded_db();
    let node = db.find_node(&name("www.example."), false).unwrap();

    let before = db.current_version();
    assert!(txt_at(&db, &before).is_none());

    let writer = db.new_version().unwrap();
    db.add_rdataset(&node, &writer, &rrset(Rtype::TXT, &[b"\x02v2"]), true)
        .unwrap();

    // Uncommitted edits are invisible to every reader.
    assert!(txt_at(&db, &before).is_none());
    let during = db.current_version();
    assert!(txt_at(&db, &during).is_none());

    db.close_version(writer, true);

    // The old snapshots still answer from their version ...
    assert!(txt_at(&db, &before).is_none());
    assert!(txt_at(&db, &during).is_none());

    // ... while new readers see the published data.
    let after = db.current_version();
    assert_eq!(txt_at(&db, &after).as_deref(), Some(b"\x02v2".as_slice()));

    db.close_version(before, false);
    db.close_version(during, false);
    db.close_version(after, false);
}

#[test]
fn every_open_version_sees_its_own_value() {
    let db = loaded_db();
    let node = db.find_node(&name("www.example."), false).unwrap();

    let mut handles = vec![db.current_version()];
    for value in [b"\x02v2".as_slice(), b"\x02v3", b"\x02v4"] {
        let writer = db.new_version().unwrap();
        db.add_rdataset(&node, &writer, &rrset(Rtype::TXT, &[value]), false)
            .unwrap();
        db.close_version(writer, true);
        handles.push(db.current_version());
    }

    let expected: [Option<&[u8]>; 4] =
        [None, Some(b"\x02v2"), Some(b"\x02v3"), Some(b"\x02v4")];
    for (handle, expected) in handles.iter().zip(expected) {
        assert_eq!(txt_at(&db, handle).as_deref(), expected);
    }
    for handle in handles {
        db.close_version(handle, false);
    }

    // With all readers gone, the latest data is still served.
    let current = db.current_version();
    assert_eq!(txt_at(&db, &current).as_deref(), Some(b"\x02v4".as_slice()));
    db.close_version(current, false);
}

#[test]
fn rollback_discards_every_edit() {
    let db = loaded_db();
    let node = db.find_node(&name("www.example."), false).unwrap();

    let writer = db.new_version().unwrap();
    db.add_rdataset(&node, &writer, &rrset(Rtype::TXT, &[b"\x01x"]), true)
        .unwrap();
    db.delete_rdataset(&node, &writer, Rtype::A, Rtype::NONE)
        .unwrap();
    db.close_version(writer, false);

    let current = db.current_version();
    assert!(txt_at(&db, &current).is_none());
    let answer = db
        .find(
            &name("www.example."),
            Some(&current),
            Rtype::A,
            FindOpts::default(),
        )
        .unwrap();
    assert_eq!(answer.outcome, FindOutcome::Success);
    db.close_version(current, false);

    // The next writer starts cleanly.
    let writer = db.new_version().unwrap();
    db.close_version(writer, true);
}

#[test]
fn only_one_writer_at_a_time() {
    let db = loaded_db();
    let writer = db.new_version().unwrap();
    assert!(matches!(
        db.new_version(),
        Err(VersionError::WriterActive)
    ));
    db.close_version(writer, false);
    let writer = db.new_version().unwrap();
    db.close_version(writer, false);
}

#[test]
fn delete_and_subtract() {
    let db = loaded_db();
    let node = db.find_node(&name("www.example."), false).unwrap();

    let writer = db.new_version().unwrap();
    db.add_rdataset(
        &node,
        &writer,
        &rrset(Rtype::TXT, &[b"\x01a", b"\x01b"]),
        true,
    )
    .unwrap();
    db.close_version(writer, true);

    let writer = db.new_version().unwrap();
    assert_eq!(
        db.subtract_rdataset(&node, &writer, &rrset(Rtype::TXT, &[b"\x01a"]))
            .unwrap(),
        Subtracted::Remaining
    );
    assert_eq!(
        db.delete_rdataset(&node, &writer, Rtype::A, Rtype::NONE).unwrap(),
        Subtracted::Removed
    );
    db.close_version(writer, true);

    let current = db.current_version();
    assert_eq!(txt_at(&db, &current).as_deref(), Some(b"\x01b".as_slice()));
    let answer = db
        .find(
            &name("www.example."),
            Some(&current),
            Rtype::A,
            FindOpts::default(),
        )
        .unwrap();
    assert_eq!(answer.outcome, FindOutcome::NxRrset);
    db.close_version(current, false);
}

#[test]
fn merge_reports_unchanged() {
    let db = loaded_db();
    let node = db.find_node(&name("www.example."), false).unwrap();
    let writer = db.new_version().unwrap();
    assert_eq!(
        db.add_rdataset(
            &node,
            &writer,
            &rrset(Rtype::A, &[&[192, 0, 2, 1]]),
            true,
        )
        .unwrap(),
        AddOutcome::Unchanged
    );
    db.close_version(writer, false);
}

#[test]
fn size_tracks_records_and_transfer_octets() {
    let db = loaded_db();
    let (records, xfrsize) = db.size(None);
    // SOA + A.
    assert_eq!(records, 2);
    assert!(xfrsize > 0);

    let node = db.find_node(&name("www.example."), false).unwrap();
    let writer = db.new_version().unwrap();
    db.add_rdataset(
        &node,
        &writer,
        &rrset(Rtype::TXT, &[b"\x01a", b"\x01b"]),
        true,
    )
    .unwrap();
    let (in_writer, _) = db.size(Some(&writer));
    assert_eq!(in_writer, 4);
    db.close_version(writer, true);

    let (after, _) = db.size(None);
    assert_eq!(after, 4);
}

#[test]
fn load_gating_and_validation() {
    let db = new_db("example.");
    let load = db.begin_load().unwrap();
    assert!(matches!(db.begin_load(), Err(LoadError::AlreadyLoading)));

    assert_eq!(
        load.add(&name("sub.example."), &rrset(Rtype::SOA, &[&soa_rdata()])),
        Err(LoadError::NotZoneTop)
    );
    assert_eq!(
        load.add(
            &name("*.example."),
            &rrset(Rtype::NS, &[name("ns.example.").as_wire()]),
        ),
        Err(LoadError::InvalidNs)
    );
    assert_eq!(
        load.add(&name("*.example."), &rrset(Rtype::NSEC3, &[b"\x01\x00"])),
        Err(LoadError::InvalidNsec3)
    );
    assert_eq!(
        load.add(&name("other.test."), &rrset(Rtype::A, &[&[1, 2, 3, 4]])),
        Err(LoadError::OutOfZone)
    );

    load.add(&name("example."), &rrset(Rtype::SOA, &[&soa_rdata()]))
        .unwrap();
    load.finish().unwrap();
    assert!(matches!(db.begin_load(), Err(LoadError::AlreadyLoaded)));
}

#[test]
fn wildcard_load_flags_every_ancestor() {
    let db = new_db("example.");
    let load = db.begin_load().unwrap();
    load.add(&name("example."), &rrset(Rtype::SOA, &[&soa_rdata()]))
        .unwrap();
    load.add(
        &name("*.deep.wild.example."),
        &rrset(Rtype::TXT, &[b"\x01w"]),
    )
    .unwrap();
    load.finish().unwrap();

    let parent = db.find_node(&name("deep.wild.example."), false).unwrap();
    assert!(parent.wild());
    assert!(parent.find_callback());
    // Only wildcard parents are materialized; the ancestor above stays
    // an implicit empty non-terminal.
    assert!(db.find_node(&name("wild.example."), false).is_none());
}

#[test]
fn nsec3_chain_and_wraparound() {
    let salt = b"\xab\xcd";
    let mut nsec3param = vec![1u8, 0, 0, 10, salt.len() as u8];
    nsec3param.extend_from_slice(salt);

    // NSEC3 rdata with the same parameters, opaque next-hash and bitmap.
    let mut nsec3 = vec![1u8, 0, 0, 10, salt.len() as u8];
    nsec3.extend_from_slice(salt);
    nsec3.extend_from_slice(b"\x04hash\x00\x01\x02");

    let zone_key: &[u8] = &[0x01, 0x01, 3, 8, b'k'];

    let db = new_db("example.");
    let load = db.begin_load().unwrap();
    load.add(&name("example."), &rrset(Rtype::SOA, &[&soa_rdata()]))
        .unwrap();
    load.add(&name("example."), &rrset(Rtype::DNSKEY, &[zone_key]))
        .unwrap();
    load.add(&name("example."), &rrset(Rtype::NSEC3PARAM, &[&nsec3param]))
        .unwrap();
    for owner in ["5k.example.", "c9.example."] {
        load.add(&name(owner), &rrset(Rtype::NSEC3, &[&nsec3]))
            .unwrap();
        let mut sig = Rrset::sig(Rtype::NSEC3, 300);
        sig.push_rdata(b"\x00\x32sig");
        load.add(&name(owner), &sig).unwrap();
    }
    load.finish().unwrap();

    let params = db.nsec3_parameters(None).unwrap();
    assert_eq!(params.hash, 1);
    assert_eq!(params.iterations, 10);
    assert_eq!(params.salt, salt);
    // The two chain owners plus the materialized origin.
    assert_eq!(db.node_count(WhichTree::Nsec3), 3);

    let opts = FindOpts {
        force_nsec3: true,
        ..Default::default()
    };

    // A hash between the two owners is covered by the predecessor.
    let answer = db
        .find(&name("8a.example."), None, Rtype::NSEC3, opts)
        .unwrap();
    assert_eq!(answer.outcome, FindOutcome::NxDomain);
    assert_eq!(answer.foundname.unwrap(), name("5k.example."));

    // A hash before the first owner wraps to the last.
    let answer = db
        .find(&name("1x.example."), None, Rtype::NSEC3, opts)
        .unwrap();
    assert_eq!(answer.outcome, FindOutcome::NxDomain);
    assert_eq!(answer.foundname.unwrap(), name("c9.example."));
}

#[test]
fn resign_scheduling() {
    let db = new_db("example.");
    let load = db.begin_load().unwrap();
    load.add(&name("example."), &rrset(Rtype::SOA, &[&soa_rdata()]))
        .unwrap();
    for (owner, resign) in
        [("a.example.", 5000u64), ("b.example.", 3000), ("c.example.", 7000)]
    {
        let mut sig = Rrset::sig(Rtype::A, 300);
        sig.push_rdata(b"\x00\x01sig");
        sig.resign = Some(resign);
        load.add(&name(owner), &sig).unwrap();
    }
    load.finish().unwrap();

    let earliest = db.get_signing_time().unwrap();
    assert_eq!(earliest.owner(), &name("b.example."));
    assert_eq!(earliest.resign(), Some((1500, false)));

    // Push the earliest far out; the next one surfaces.
    db.set_signing_time(&earliest, 9000);
    let next = db.get_signing_time().unwrap();
    assert_eq!(next.owner(), &name("a.example."));

    // Unschedule everything.
    while let Some(rdataset) = db.get_signing_time() {
        db.set_signing_time(&rdataset, 0);
    }
    assert!(db.get_signing_time().is_none());
}

#[test]
fn resign_survives_rollback() {
    let db = new_db("example.");
    let load = db.begin_load().unwrap();
    load.add(&name("example."), &rrset(Rtype::SOA, &[&soa_rdata()]))
        .unwrap();
    let mut sig = Rrset::sig(Rtype::A, 300);
    sig.push_rdata(b"\x00\x01old");
    sig.resign = Some(4000);
    load.add(&name("a.example."), &sig).unwrap();
    load.finish().unwrap();

    let node = db.find_node(&name("a.example."), false).unwrap();

    // A writer replaces the signature, then changes its mind.
    let writer = db.new_version().unwrap();
    let mut newsig = Rrset::sig(Rtype::A, 300);
    newsig.push_rdata(b"\x00\x01new");
    newsig.resign = Some(2000);
    db.add_rdataset(&node, &writer, &newsig, false).unwrap();
    db.close_version(writer, false);

    let earliest = db.get_signing_time().unwrap();
    assert_eq!(earliest.owner(), &name("a.example."));
    assert_eq!(earliest.resign(), Some((2000, false)));
}

#[test]
fn committed_resign_headers_enter_the_heap() {
    let db = loaded_db();
    let node = db.find_node(&name("www.example."), false).unwrap();
    assert!(db.get_signing_time().is_none());

    let writer = db.new_version().unwrap();
    let mut sig = Rrset::sig(Rtype::A, 300);
    sig.push_rdata(b"\x00\x01sig");
    sig.resign = Some(1234);
    db.add_rdataset(&node, &writer, &sig, true).unwrap();
    // Not scheduled until the version is published.
    assert!(db.get_signing_time().is_none());
    db.close_version(writer, true);

    let earliest = db.get_signing_time().unwrap();
    assert_eq!(earliest.owner(), &name("www.example."));
}

#[test]
fn find_rdataset_and_all_rdatasets() {
    let db = loaded_db();
    let node = db.find_node(&name("www.example."), false).unwrap();

    let (rdataset, sig) = db
        .find_rdataset(&node, None, Rtype::A, Rtype::NONE)
        .unwrap();
    assert_eq!(rdataset.rtype(), Rtype::A);
    assert!(sig.is_none());
    assert!(db
        .find_rdataset(&node, None, Rtype::TXT, Rtype::NONE)
        .is_none());

    let all = db.all_rdatasets(&node, None);
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].rtype(), Rtype::A);

    let origin = db.origin_node();
    let all = db.all_rdatasets(&origin, None);
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].rtype(), Rtype::SOA);
}

#[test]
fn stale_resign_times_update_after_commit() {
    // A committed overwrite of a RESIGN set replaces its heap entry.
    let db = new_db("example.");
    let load = db.begin_load().unwrap();
    load.add(&name("example."), &rrset(Rtype::SOA, &[&soa_rdata()]))
        .unwrap();
    let mut sig = Rrset::sig(Rtype::A, 300);
    sig.push_rdata(b"\x00\x01old");
    sig.resign = Some(4000);
    load.add(&name("a.example."), &sig).unwrap();
    load.finish().unwrap();

    let node = db.find_node(&name("a.example."), false).unwrap();
    let writer = db.new_version().unwrap();
    let mut newsig = Rrset::sig(Rtype::A, 300);
    newsig.push_rdata(b"\x00\x01new");
    newsig.resign = Some(2000);
    db.add_rdataset(&node, &writer, &newsig, false).unwrap();
    db.close_version(writer, true);

    let earliest = db.get_signing_time().unwrap();
    assert_eq!(earliest.resign(), Some((1000, false)));
}
