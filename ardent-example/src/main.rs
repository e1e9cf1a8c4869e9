use ardent::config::Config;
use ardent::query::{Condition, OrderBy};
use ardent::registry::ConnectionKey;
use ardent::rusqlite::SqliteAdapter;
use ardent::validation::Validation;
use ardent::{AllOptions, BoxError, Document, Entity, Record, Timestamps, ToActiveRecord};

#[derive(Debug, Clone, Default, Entity)]
struct Vehicle {
    id: i64,
    make: String,
    model: String,
    year: i32,
    timestamps: Timestamps,
}

impl Record for Vehicle {
    fn validate(&self, v: &mut Validation) {
        v.required("make", &self.make);
        v.required("model", &self.model);
        v.range("year", &self.year, 1885, 2100);
    }

    fn after_save(&mut self) -> Result<(), BoxError> {
        tracing::info!(id = self.id, model = %self.model, "saved vehicle");
        Ok(())
    }
}

fn run(adapter: &SqliteAdapter) -> Result<(), ardent::Error> {
    println!("Saving vehicles...");
    for (make, model, year) in [
        ("porsche", "panamera", 2010),
        ("porsche", "cayenne", 2010),
        ("porsche", "panamera", 2009),
        ("tesla", "model s", 2012),
        ("", "nameless", 1700),
    ] {
        let mut vehicle = Vehicle {
            make: make.into(),
            model: model.into(),
            year,
            ..Default::default()
        }
        .to_active_record(adapter);

        if !vehicle.save()? {
            for (field, error) in vehicle.errors() {
                println!("Not saved, {field}: {}", error.message);
            }
        }
    }

    let mut vehicles = Vehicle::default().to_active_record(adapter);

    println!("Querying 2010 panameras...");
    let found: Vec<Vehicle> = vehicles
        .filter(Condition::eq("year", 2010))
        .filter(Condition::eq("model", "panamera"))
        .run()?;
    for vehicle in &found {
        println!("Got vehicle: {vehicle:?}");
    }

    println!("Listing models...");
    let models: Vec<Document> = vehicles
        .pluck(["make", "model"])
        .distinct()
        .order(OrderBy::asc("make"))
        .order(OrderBy::asc("model"))
        .run()?;
    for model in &models {
        println!("Got model: {} {}", model.get::<String>("make")?, model.get::<String>("model")?);
    }

    println!("Summing years...");
    let total: Vec<Document> = vehicles.sum(["year"]).run()?;
    println!("Got sum: {:?}", total.first().map(|doc| doc.get::<i64>("sum")).transpose()?);

    println!("Updating the tesla...");
    let tesla: Vec<Vehicle> = vehicles.filter(Condition::eq("make", "tesla")).run()?;
    if let Some(tesla) = tesla.into_iter().next() {
        let mut tesla = tesla.to_active_record(adapter);
        tesla.year = 2013;
        tesla.save()?;
        println!("Got vehicle: {:?}", vehicles.find(tesla.id)?);

        println!("Deleting the tesla...");
        tesla.delete()?;
        println!("Find after delete: {:?}", vehicles.find(tesla.id).map_err(|e| e.kind()));
    }

    println!("Listing the first two vehicles...");
    for vehicle in vehicles.all(&AllOptions::new().limit(2))? {
        println!("Got vehicle: {vehicle:?}");
    }

    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_path(path),
        None => Config::discover(),
    };
    let config = match config {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "unable to load configuration");
            std::process::exit(1);
        }
    };

    let adapter = SqliteAdapter::new(config);
    let conn = match adapter.connection(&ConnectionKey::default()) {
        Ok(conn) => conn,
        Err(err) => {
            tracing::error!(error = %err, "unable to open database");
            std::process::exit(1);
        }
    };

    println!("Creating table...");
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS vehicles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            make TEXT NOT NULL,
            model TEXT NOT NULL,
            year INTEGER NOT NULL,
            created_at TEXT,
            updated_at TEXT
        )",
    )
    .expect("setup");

    let ok = match run(&adapter) {
        Ok(()) => true,
        Err(e) => {
            eprintln!("Error: {e}");
            false
        }
    };

    println!("Dropping table...");
    conn.execute_batch("DROP TABLE vehicles").expect("teardown");

    println!("Done{}.", if ok { "" } else { " (with errors)" });
}
