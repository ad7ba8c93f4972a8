//! End-to-end pipeline tests: store → builder → serializer → document.

use dmng_core::builder::build_profile;
use dmng_core::origin::Origin;
use dmng_core::serialize::{fix_depth, PolicyDocument, Serializer};
use dmng_core::{Permission, RequirementStore, Session};

fn perm(literal: &str) -> Permission {
    Permission::parse(literal).unwrap()
}

#[test]
fn store_to_document_round_trip() {
    let home = tempfile::tempdir().unwrap();
    let session = Session::at_home(home.path());
    let mut store = RequirementStore::open(&session).unwrap();

    let pol = store.set_active_context("ls", "dev").unwrap();
    store
        .add_rule(pol, "/bin/ls", perm("r-x"), Origin::Executable)
        .unwrap();

    let ident = store.policies().unwrap().remove(0);
    let built = build_profile(&mut store, &session, &ident, 10).unwrap();
    assert!(built.achieved);

    let mut serializer = Serializer::new(session.profiles_dir());
    serializer.add_policy(&ident, &built.entries, &store.denials(pol).unwrap());
    let target = serializer.write("policy.json").unwrap();

    let document: PolicyDocument =
        serde_json::from_str(&std::fs::read_to_string(&target).unwrap()).unwrap();
    assert_eq!(document.policies.len(), 1);

    let policy = &document.policies[0];
    assert_eq!(policy.policy_name, "ls_dev");
    assert_eq!(policy.read, vec!["/bin/ls"]);
    assert!(policy.write.is_empty());
    assert_eq!(policy.exec, vec!["/bin/ls"]);

    // With no explicit denial, only the output directory is denied, and
    // max_depth reflects its segment depth.
    let profiles_dir = session.profiles_dir().to_string_lossy().into_owned();
    assert_eq!(policy.deny, vec![profiles_dir.clone()]);
    let expected_depth = profiles_dir.split('/').skip(1).count() as i64;
    assert_eq!(document.max_depth, expected_depth);

    // Serializing again after a rebuild yields identical content.
    let built = build_profile(&mut store, &session, &ident, 10).unwrap();
    let mut serializer = Serializer::new(session.profiles_dir());
    serializer.add_policy(&ident, &built.entries, &store.denials(pol).unwrap());
    let target = serializer.write("policy.json").unwrap();
    let reread: PolicyDocument =
        serde_json::from_str(&std::fs::read_to_string(&target).unwrap()).unwrap();
    assert_eq!(reread, document);
}

#[test]
fn traced_evidence_is_compressed_into_a_profile() {
    let home = tempfile::tempdir().unwrap();
    let session = Session::at_home(home.path());
    let mut store = RequirementStore::open(&session).unwrap();

    let pol = store.set_active_context("editor", "prod").unwrap();
    // Evidence as a dynamic trace would deliver it: many library reads,
    // a couple of device writes, a /proc entry, and a user file.
    let items: Vec<(String, Permission)> = vec![
        ("/lib/x86_64/libc.so.6".to_string(), perm("r-x")),
        ("/lib/x86_64/libm.so.6".to_string(), perm("r-x")),
        ("/lib/x86_64/libtinfo.so.6".to_string(), perm("r-x")),
        ("/dev/null".to_string(), perm("rw-")),
        ("/dev/tty".to_string(), perm("rw-")),
        ("/proc/self/maps".to_string(), perm("r--")),
        ("/home/user/notes.txt".to_string(), perm("rw-")),
    ];
    store.add_rules(pol, &items, Origin::StraceFile).unwrap();
    store.add_denial(pol, "/etc/shadow").unwrap();

    let ident = store.policies().unwrap().remove(0);
    let built = build_profile(&mut store, &session, &ident, 3).unwrap();
    assert!(built.achieved);

    let mut reqs: Vec<&str> = built.entries.iter().map(|r| r.req.as_str()).collect();
    reqs.sort_unstable();
    // Libraries fold into /lib/x86_64, devices into /dev, the /proc entry
    // vanishes, and the user file survives untouched.
    assert_eq!(reqs, vec!["/dev", "/home/user/notes.txt", "/lib/x86_64"]);

    let mut serializer = Serializer::new(session.profiles_dir());
    serializer.add_policy(&ident, &built.entries, &store.denials(pol).unwrap());
    let target = serializer.write("editor.json").unwrap();

    let document: PolicyDocument =
        serde_json::from_str(&std::fs::read_to_string(&target).unwrap()).unwrap();
    let policy = &document.policies[0];
    assert_eq!(policy.policy_name, "editor_prod");
    assert!(policy.deny.contains(&"/etc/shadow".to_string()));
    assert!(policy.write.contains(&"/dev".to_string()));
    assert!(policy.write.contains(&"/home/user/notes.txt".to_string()));
    assert!(!policy.read.iter().any(|p| p.starts_with("/proc")));

    // Corrupting and repairing max_depth converges to the same value.
    let before = document.max_depth;
    fix_depth(session.profiles_dir(), "editor.json").unwrap();
    let repaired: PolicyDocument =
        serde_json::from_str(&std::fs::read_to_string(&target).unwrap()).unwrap();
    assert_eq!(repaired.max_depth, before);
}
