#![cfg(all(feature = "postgres", feature = "derive"))]

//! These tests need a live server.  Point them at one with
//! `ARDENT_PG_SERVER`, `ARDENT_PG_DBNAME`, `ARDENT_PG_USER` and
//! `ARDENT_PG_PASSWORD`, then run with `--ignored`.

use ardent::config::Config;
use ardent::postgres::PostgresAdapter;
use ardent::query::Condition;
use ardent::registry::ConnectionKey;
use ardent::{AllOptions, Document, Entity, Record, Timestamps, ToActiveRecord};

/// The tests share one table.
static SERVER: parking_lot::Mutex<()> = parking_lot::Mutex::new(());

#[derive(Debug, Clone, Default, PartialEq, Entity)]
struct Vehicle {
    id: i64,
    make: String,
    model: String,
    year: i32,
    timestamps: Timestamps,
}

impl Record for Vehicle {}

fn adapter() -> PostgresAdapter {
    let config = Config::from_json_str(
        r#"{
            "environment": "test",
            "test": {
                "postgresql": {
                    "default": {
                        "server": "ENV[ARDENT_PG_SERVER]",
                        "dbname": "ENV[ARDENT_PG_DBNAME]",
                        "username": "ENV[ARDENT_PG_USER]",
                        "password": "ENV[ARDENT_PG_PASSWORD]",
                        "maxopenconnections": 2
                    }
                }
            }
        }"#,
    )
    .unwrap();

    let adapter = PostgresAdapter::new(config);
    adapter
        .connection(&ConnectionKey::default())
        .unwrap()
        .batch_execute(
            "DROP TABLE IF EXISTS vehicles CASCADE;
            CREATE TABLE vehicles (
                id BIGSERIAL PRIMARY KEY,
                make TEXT NOT NULL,
                model TEXT NOT NULL,
                year INTEGER NOT NULL,
                created_at TIMESTAMPTZ,
                updated_at TIMESTAMPTZ
            )",
        )
        .unwrap();
    adapter
}

#[test]
#[ignore]
fn end_to_end() {
    let _server = SERVER.lock();
    let adapter = adapter();

    for (model, year) in [("panamera", 2010), ("cayenne", 2010), ("panamera", 2009)] {
        let mut vehicle = Vehicle {
            make: "porsche".into(),
            model: model.into(),
            year,
            ..Default::default()
        }
        .to_active_record(&adapter);
        assert!(vehicle.save().unwrap());
        assert!(vehicle.id > 0);
    }

    let mut query = Vehicle::default().to_active_record(&adapter);
    let found: Vec<Vehicle> = query
        .filter(Condition::eq("year", 2010))
        .filter(Condition::eq("model", "panamera"))
        .run()
        .unwrap();
    assert_eq!(1, found.len());

    let mut panamera = found[0].clone().to_active_record(&adapter);
    panamera.year = 2011;
    assert!(panamera.save().unwrap());
    assert_eq!(2011, query.find(panamera.id).unwrap().year);

    let total: Vec<Document> = query.sum(["year"]).run().unwrap();
    assert_eq!(6030.0, total[0].get::<f64>("sum").unwrap());

    panamera.delete().unwrap();
    assert!(query.find(panamera.id).unwrap_err().is_not_found());
    assert_eq!(2, query.all(&AllOptions::new()).unwrap().len());
    assert_eq!(None, query.truncate().unwrap());
}

#[test]
#[ignore]
fn set_returning_functions() {
    let _server = SERVER.lock();
    let adapter = adapter();
    for (model, year) in [("sprite", 1958), ("mk", 1961), ("panamera", 2010)] {
        let mut vehicle = Vehicle {
            make: "various".into(),
            model: model.into(),
            year,
            ..Default::default()
        }
        .to_active_record(&adapter);
        assert!(vehicle.save().unwrap());
    }

    adapter
        .connection(&ConnectionKey::default())
        .unwrap()
        .batch_execute(
            "CREATE OR REPLACE FUNCTION vehicles_since(since INTEGER) RETURNS SETOF vehicles AS $$
                SELECT * FROM vehicles WHERE year >= since ORDER BY id
            $$ LANGUAGE SQL",
        )
        .unwrap();

    let rows = adapter
        .call_procedure(&ConnectionKey::default(), "vehicles_since", &[ardent::Value::Int(1960)])
        .unwrap();
    let found: Vec<Vehicle> = rows.iter().map(|row| ardent::FromDocument::from_document(row).unwrap()).collect();
    assert_eq!(vec!["mk", "panamera"], found.iter().map(|v| v.model.as_str()).collect::<Vec<_>>());
}
