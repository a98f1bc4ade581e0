//! Client-operation tests against a master wired to in-memory backends.

use ramvault_common::{
    DispatchConfig, RejectRules, Status, Tablet, VERSION_NONEXISTENT,
};
use ramvault_master::testing::TestCluster;
use ramvault_master::RpcFailure;

#[test]
fn create_basics() {
    let cluster = TestCluster::new();
    let client = cluster.client();

    assert_eq!(client.create(0, b"item0").unwrap(), (0, 1));
    assert_eq!(client.create(0, b"item1").unwrap(), (1, 2));
    assert_eq!(client.create(0, b"item2").unwrap(), (2, 3));

    assert_eq!(client.read(0, 0).unwrap().0.as_ref(), b"item0");
    assert_eq!(client.read(0, 1).unwrap().0.as_ref(), b"item1");
    assert_eq!(client.read(0, 2).unwrap().0.as_ref(), b"item2");
}

#[test]
fn create_bad_table() {
    let cluster = TestCluster::new();
    let client = cluster.client();

    assert_eq!(
        client.create(4, b""),
        Err(RpcFailure {
            status: Status::TableDoesntExist,
            version: VERSION_NONEXISTENT,
        })
    );
}

#[test]
fn ping() {
    let cluster = TestCluster::new();
    cluster.client().ping().unwrap();
}

#[test]
fn read_basics() {
    let cluster = TestCluster::new();
    let client = cluster.client();

    client.create(0, b"abcdef").unwrap();
    let (value, version) = client.read(0, 0).unwrap();
    assert_eq!(value.as_ref(), b"abcdef");
    assert_eq!(version, 1);
}

#[test]
fn read_bad_table() {
    let cluster = TestCluster::new();
    assert_eq!(
        cluster.client().read(4, 0).unwrap_err().status,
        Status::TableDoesntExist
    );
}

#[test]
fn read_no_such_object() {
    let cluster = TestCluster::new();
    assert_eq!(
        cluster.client().read(0, 5).unwrap_err().status,
        Status::ObjectDoesntExist
    );
}

#[test]
fn read_reject_rules() {
    let cluster = TestCluster::new();
    let client = cluster.client();
    client.create(0, b"abcdef").unwrap();

    let rules = RejectRules {
        version_ne_given: true,
        given_version: 2,
        ..RejectRules::default()
    };
    let err = client.read_with_rules(0, 0, &rules).unwrap_err();
    assert_eq!(err.status, Status::WrongVersion);
    // The version alongside the error is the live version.
    assert_eq!(err.version, 1);
}

#[test]
fn multi_read_basics() {
    let cluster = TestCluster::new();
    let client = cluster.client();
    client.create(0, b"firstVal").unwrap();
    client.create(0, b"secondVal").unwrap();

    let results = client.multi_read(&[(0, 0), (0, 1)]).unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].status, Status::Ok);
    assert_eq!(results[0].version, 1);
    assert_eq!(results[0].payload.as_ref().unwrap().as_ref(), b"firstVal");
    assert_eq!(results[1].status, Status::Ok);
    assert_eq!(results[1].version, 2);
    assert_eq!(results[1].payload.as_ref().unwrap().as_ref(), b"secondVal");
}

#[test]
fn multi_read_bad_table() {
    let cluster = TestCluster::new();
    let client = cluster.client();
    client.create(0, b"value1").unwrap();

    let results = client.multi_read(&[(0, 0), (10, 0)]).unwrap();
    assert_eq!(results[0].status, Status::Ok);
    assert_eq!(results[0].version, 1);
    assert_eq!(results[0].payload.as_ref().unwrap().as_ref(), b"value1");
    assert_eq!(results[1].status, Status::TableDoesntExist);
    assert!(results[1].payload.is_none());
}

#[test]
fn multi_read_no_such_object() {
    let cluster = TestCluster::new();
    let client = cluster.client();
    client.create(0, b"firstVal").unwrap();
    client.create(0, b"secondVal").unwrap();

    let results = client.multi_read(&[(0, 0), (0, 20), (0, 1)]).unwrap();
    assert_eq!(results[0].status, Status::Ok);
    assert_eq!(results[0].version, 1);
    assert_eq!(results[1].status, Status::ObjectDoesntExist);
    assert!(results[1].payload.is_none());
    assert_eq!(results[2].status, Status::Ok);
    assert_eq!(results[2].version, 2);
    assert_eq!(results[2].payload.as_ref().unwrap().as_ref(), b"secondVal");
}

#[test]
fn remove_basics() {
    let cluster = TestCluster::new();
    let client = cluster.client();
    client.create(0, b"item0").unwrap();

    assert_eq!(client.remove(0, 0).unwrap(), 1);
    assert_eq!(
        client.read(0, 0).unwrap_err().status,
        Status::ObjectDoesntExist
    );
}

#[test]
fn remove_bad_table() {
    let cluster = TestCluster::new();
    assert_eq!(
        cluster.client().remove(4, 0).unwrap_err().status,
        Status::TableDoesntExist
    );
}

#[test]
fn remove_reject_rules() {
    let cluster = TestCluster::new();
    let client = cluster.client();
    client.create(0, b"item0").unwrap();

    let rules = RejectRules {
        version_ne_given: true,
        given_version: 2,
        ..RejectRules::default()
    };
    let err = client.remove_with_rules(0, 0, &rules).unwrap_err();
    assert_eq!(err.status, Status::WrongVersion);
    assert_eq!(err.version, 1);
    // The object survived the rejected remove.
    assert_eq!(client.read(0, 0).unwrap().1, 1);
}

#[test]
fn remove_object_already_deleted_reject_rules() {
    let cluster = TestCluster::new();
    let client = cluster.client();

    let rules = RejectRules {
        doesnt_exist: true,
        ..RejectRules::default()
    };
    let err = client.remove_with_rules(0, 0, &rules).unwrap_err();
    assert_eq!(err.status, Status::ObjectDoesntExist);
    assert_eq!(err.version, VERSION_NONEXISTENT);
}

#[test]
fn remove_object_already_deleted() {
    let cluster = TestCluster::new();
    let client = cluster.client();

    assert_eq!(client.remove(0, 1).unwrap(), VERSION_NONEXISTENT);
    client.create(0, b"abcdef").unwrap();
    client.remove(0, 0).unwrap();
    assert_eq!(client.remove(0, 0).unwrap(), VERSION_NONEXISTENT);
}

#[test]
fn set_tablets_preserves_surviving_tables() {
    let cluster = TestCluster::new();
    let client = cluster.client();

    client
        .set_tablets(&[Tablet::new(1, 0, 1), Tablet::new(2, 0, 1)])
        .unwrap();
    assert_eq!(client.write(1, 0, b"one").unwrap(), 1);
    assert_eq!(client.write(2, 0, b"two").unwrap(), 1);

    // Drop table 1, extend table 2, add table 3.
    client
        .set_tablets(&[
            Tablet::new(2, 0, 1),
            Tablet::new(2, 2, 3),
            Tablet::new(3, 0, 1),
        ])
        .unwrap();

    assert_eq!(
        client.write(1, 0, b"gone").unwrap_err().status,
        Status::TableDoesntExist
    );
    // Table 2 kept its version sequence across the reconfiguration.
    assert_eq!(client.write(2, 2, b"more").unwrap(), 2);
    // Table 3 starts fresh.
    assert_eq!(client.write(3, 0, b"new").unwrap(), 1);
}

#[test]
fn write_version_sequence() {
    let cluster = TestCluster::new();
    let client = cluster.client();

    assert_eq!(client.write(0, 3, b"item0").unwrap(), 1);
    let (value, version) = client.read(0, 3).unwrap();
    assert_eq!(value.as_ref(), b"item0");
    assert_eq!(version, 1);

    assert_eq!(client.write(0, 3, b"item0-v2").unwrap(), 2);
    assert_eq!(client.read(0, 3).unwrap().0.as_ref(), b"item0-v2");

    assert_eq!(client.write(0, 3, b"item0-v3").unwrap(), 3);
    let (value, version) = client.read(0, 3).unwrap();
    assert_eq!(value.as_ref(), b"item0-v3");
    assert_eq!(version, 3);
}

#[test]
fn write_reject_rules() {
    let cluster = TestCluster::new();
    let client = cluster.client();

    let rules = RejectRules {
        doesnt_exist: true,
        ..RejectRules::default()
    };
    let err = client
        .write_with_rules(0, 3, b"item0", &rules)
        .unwrap_err();
    assert_eq!(err.status, Status::ObjectDoesntExist);
    assert_eq!(err.version, VERSION_NONEXISTENT);
}

#[test]
fn recovering_tablet_asks_clients_to_retry() {
    let cluster = TestCluster::new();
    let client = cluster.client();
    cluster
        .master
        .set_tablets(vec![Tablet::recovering(0, 0, u64::MAX)]);

    assert_eq!(client.read(0, 0).unwrap_err().status, Status::Retry);
    assert_eq!(client.write(0, 0, b"x").unwrap_err().status, Status::Retry);
    assert_eq!(client.remove(0, 0).unwrap_err().status, Status::Retry);
}

#[test]
fn operations_through_the_dispatch_loop() {
    let cluster = TestCluster::new();
    let client = cluster.dispatched_client(DispatchConfig::default());

    client.ping().unwrap();
    assert_eq!(client.create(0, b"item0").unwrap(), (0, 1));
    assert_eq!(client.write(0, 7, b"direct").unwrap(), 2);
    let (value, version) = client.read(0, 0).unwrap();
    assert_eq!(value.as_ref(), b"item0");
    assert_eq!(version, 1);
    assert_eq!(
        client.read(9, 0).unwrap_err().status,
        Status::TableDoesntExist
    );
}
