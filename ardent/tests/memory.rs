#![cfg(feature = "derive")]

use ardent::memory::MemoryAdapter;
use ardent::query::{Condition, OrderBy};
use ardent::validation::Validation;
use ardent::{AllOptions, BoxError, Document, Entity, ErrorKind, Record, RecordState, Timestamps, ToActiveRecord};

#[derive(Debug, Clone, Default, PartialEq, Entity)]
struct Vehicle {
    #[ardent(key)]
    id: String,
    make: String,
    model: String,
    year: i32,
    #[ardent(timestamps)]
    timestamps: Timestamps,
    #[ardent(skip)]
    recall: bool,
}

impl Vehicle {
    fn new(make: &str, model: &str, year: i32) -> Self {
        Vehicle {
            make: make.into(),
            model: model.into(),
            year,
            ..Default::default()
        }
    }
}

impl Record for Vehicle {
    fn validate(&self, v: &mut Validation) {
        v.required("make", &self.make);
        v.required("model", &self.model);
        v.range("year", &self.year, 1885, 2100);
    }

    fn before_save(&mut self) -> Result<(), BoxError> {
        if self.recall {
            return Err("vehicle is under recall".into());
        }
        Ok(())
    }
}

#[derive(Debug, Default, Entity)]
#[ardent(model = "motocicletas", connection = "garage")]
struct Motorcycle {
    id: i64,
    #[ardent(rename = "marca")]
    make: String,
    timestamps: Timestamps,
}

impl Record for Motorcycle {}

fn porsches(adapter: &MemoryAdapter) {
    for (model, year) in [("panamera", 2010), ("cayenne", 2010), ("panamera", 2009)] {
        let mut vehicle = Vehicle::new("porsche", model, year).to_active_record(adapter);
        assert!(vehicle.save().unwrap());
    }
}

#[test]
fn derived_descriptor() {
    assert_eq!("vehicles", Vehicle::model_name());
    assert_eq!("id", Vehicle::key_field());
    assert_eq!("motocicletas", Motorcycle::model_name());

    let bike = Motorcycle {
        make: "ducati".into(),
        ..Default::default()
    };
    assert_eq!("garage", bike.connection_name());
    assert_eq!(None, bike.key());

    let doc = ardent::ToDocument::to_document(&bike);
    assert!(!doc.contains("id"));
    assert_eq!("ducati", doc.get::<String>("marca").unwrap());
    assert!(doc.contains(Timestamps::CREATED_AT));

    let vehicle = Vehicle {
        recall: true,
        ..Vehicle::new("tesla", "roadster", 2008)
    };
    assert!(!ardent::ToDocument::to_document(&vehicle).contains("recall"));
}

#[test]
fn tesla_gets_a_generated_key() {
    let adapter = MemoryAdapter::new();
    let mut tesla = Vehicle::new("tesla", "model s", 2009).to_active_record(&adapter);

    assert!(tesla.save().unwrap());
    assert_eq!(RecordState::Persisted, tesla.state());
    assert!(!tesla.id.is_empty());
    assert!(tesla.timestamps.created_at.is_some());
    assert!(tesla.timestamps.updated_at.is_none());

    let found = tesla.find(tesla.id.clone()).unwrap();
    assert_eq!(tesla.record(), &found);
}

#[test]
fn second_save_updates() {
    let adapter = MemoryAdapter::new();
    let mut tesla = Vehicle::new("tesla", "model s", 2009).to_active_record(&adapter);
    assert!(tesla.save().unwrap());
    let created = tesla.timestamps.created_at;

    tesla.year = 2012;
    assert!(tesla.save().unwrap());
    assert_eq!(created, tesla.timestamps.created_at);
    assert!(tesla.timestamps.updated_at.is_some());

    let found = tesla.find(tesla.id.clone()).unwrap();
    assert_eq!(2012, found.year);
    assert_eq!(1, tesla.all(&AllOptions::new()).unwrap().len());
}

#[test]
fn invalid_records_are_not_saved() {
    let adapter = MemoryAdapter::new();
    let mut vehicle = Vehicle::new("", "model s", 1700).to_active_record(&adapter);

    assert!(!vehicle.save().unwrap());
    let errors = vehicle.errors();
    assert_eq!("Required", errors["make"].message);
    assert_eq!("Range is 1885 to 2100", errors["year"].message);
    assert!(vehicle.all(&AllOptions::new()).unwrap().is_empty());
}

#[test]
fn before_save_error_is_returned() {
    let adapter = MemoryAdapter::new();
    let mut vehicle = Vehicle {
        recall: true,
        ..Vehicle::new("tesla", "roadster", 2008)
    }
    .to_active_record(&adapter);

    let err = vehicle.save().unwrap_err();
    assert_eq!(ErrorKind::Hook, err.kind());
    assert_eq!("vehicle is under recall", err.to_string());
    assert!(vehicle.all(&AllOptions::new()).unwrap().is_empty());
}

#[test]
fn query_for_one_panamera() {
    let adapter = MemoryAdapter::new();
    porsches(&adapter);

    let mut query = Vehicle::default().to_active_record(&adapter);
    let found: Vec<Vehicle> = query
        .filter(Condition::eq("year", 2010))
        .filter(Condition::eq("model", "panamera"))
        .run()
        .unwrap();
    assert_eq!(1, found.len());
    assert_eq!("panamera", found[0].model);
    assert_eq!(2010, found[0].year);
    assert!(query.query().is_empty());
}

#[test]
fn plucks_order_and_sums() {
    let adapter = MemoryAdapter::new();
    porsches(&adapter);

    let mut query = Vehicle::default().to_active_record(&adapter);
    let models: Vec<Document> = query
        .pluck(["model"])
        .order(OrderBy::asc("model"))
        .distinct()
        .run()
        .unwrap();
    let models: Vec<String> = models.iter().map(|doc| doc.get("model").unwrap()).collect();
    assert_eq!(vec!["cayenne", "panamera"], models);

    let total: Vec<Document> = query.sum(["year"]).run().unwrap();
    assert_eq!(6029, total[0].get::<i64>("sum").unwrap());

    let err = query.sum(["year", "make"]).run::<Document>().unwrap_err();
    assert_eq!(ErrorKind::Aggregation, err.kind());
}

#[test]
fn delete_then_find() {
    let adapter = MemoryAdapter::new();
    let mut tesla = Vehicle::new("tesla", "model s", 2009).to_active_record(&adapter);
    assert!(tesla.save().unwrap());
    let id = tesla.id.clone();

    tesla.delete().unwrap();
    assert_eq!(RecordState::Deleted, tesla.state());
    assert!(tesla.find(id).unwrap_err().is_not_found());
    assert_eq!(ErrorKind::State, tesla.save().unwrap_err().kind());
}

#[test]
fn limits_are_checked() {
    let adapter = MemoryAdapter::new();
    let vehicles = Vehicle::default().to_active_record(&adapter);
    assert_eq!(ErrorKind::Limit, vehicles.all(&AllOptions::new().limit(1001)).unwrap_err().kind());
    assert_eq!(ErrorKind::Limit, vehicles.all(&AllOptions::new().limit(0)).unwrap_err().kind());
}

#[test]
fn integer_keys_on_their_own_connection() {
    let adapter = MemoryAdapter::new();
    let mut bike = Motorcycle::default().to_active_record(&adapter);
    bike.set_key(7).unwrap();
    bike.make = "ducati".into();
    assert!(bike.save().unwrap());

    let found = bike.find(7).unwrap();
    assert_eq!("ducati", found.make);
    assert_eq!(7, found.id);

    let garage = adapter.store(&bike.model().connection).unwrap();
    assert_eq!(1, garage.len("motocicletas"));
    let default = adapter.store(&ardent::registry::ConnectionKey::default()).unwrap();
    assert!(default.is_empty("motocicletas"));
}
