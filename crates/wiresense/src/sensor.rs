//! Sensors and the configured handle that creates them.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::config::{Config, OnSendFailure};
use crate::csv_log::{self, CsvLog};
use crate::error::{Error, LogError, Result};
use crate::reading::{Payload, Reading};
use crate::registry::Registry;
use crate::transport::{Fanout, HttpPush, Hub, Transport};

/// Source of readings for a sensor.
///
/// Implemented for every `FnMut() -> anyhow::Result<Reading>` closure, so
/// most callers never implement it by hand.
pub trait Producer: Send {
    /// Takes one reading.
    fn read(&mut self) -> anyhow::Result<Reading>;
}

impl<F> Producer for F
where
    F: FnMut() -> anyhow::Result<Reading> + Send,
{
    fn read(&mut self) -> anyhow::Result<Reading> {
        self()
    }
}

/// Configured library handle.
///
/// Cheap to clone; all clones share the server, transport and sensor names.
#[derive(Clone)]
pub struct Wiresense {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    transport: Arc<dyn Transport>,
    registry: Registry,
    hub: Option<Arc<Hub>>,
}

impl Wiresense {
    /// Starts the configured transports.
    ///
    /// Runs the frontend server when `server.enable` is set and pushes to
    /// `push.url` when one is given. At least one of them is required.
    pub async fn configure(config: Config) -> Result<Self> {
        let registry = Registry::new();
        let mut transports: Vec<Arc<dyn Transport>> = Vec::new();

        let hub = if config.server.enable {
            info!("Starting server...");
            let hub = Arc::new(Hub::bind(config.server.bind_addr(), registry.clone()).await?);
            transports.push(hub.clone());
            Some(hub)
        } else {
            None
        };

        if let Some(url) = &config.push.url {
            let push = HttpPush::new(url.clone(), config.push.timeout())
                .map_err(|e| Error::Config(format!("invalid push target: {}", e)))?;
            info!("Pushing readings to {}", url);
            transports.push(Arc::new(push));
        }

        let transport: Arc<dyn Transport> = match transports.len() {
            0 => {
                return Err(Error::Config(
                    "no transport enabled: set server.enable or push.url".to_string(),
                ))
            }
            1 => transports.remove(0),
            _ => Arc::new(Fanout::new(transports)),
        };

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                transport,
                registry,
                hub,
            }),
        })
    }

    /// Uses a caller-supplied transport instead of the configured ones.
    ///
    /// The server and push settings of `config` are ignored.
    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                registry: Registry::new(),
                hub: None,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Address of the built-in server, if it runs.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.hub.as_ref().map(|hub| hub.local_addr())
    }

    /// The built-in server, if it runs.
    pub fn hub(&self) -> Option<&Hub> {
        self.inner.hub.as_deref()
    }

    /// Names of all live sensors.
    pub fn sensor_names(&self) -> Vec<String> {
        self.inner.registry.names()
    }

    /// Creates a sensor from a closure.
    ///
    /// The producer is called once to check that it yields a usable
    /// reading; its metric names become the CSV header. That reading is not
    /// logged or sent.
    pub fn sensor<F>(
        &self,
        name: impl Into<String>,
        producer: F,
        path: impl AsRef<Path>,
    ) -> Result<Sensor>
    where
        F: FnMut() -> anyhow::Result<Reading> + Send + 'static,
    {
        self.sensor_from(name, producer, path)
    }

    /// Creates a sensor from any [`Producer`].
    pub fn sensor_from<P>(
        &self,
        name: impl Into<String>,
        producer: P,
        path: impl AsRef<Path>,
    ) -> Result<Sensor>
    where
        P: Producer + 'static,
    {
        self.sensor_boxed(name, Box::new(producer), path)
    }

    /// Creates a sensor from a boxed [`Producer`], e.g. one picked at runtime.
    pub fn sensor_boxed(
        &self,
        name: impl Into<String>,
        mut producer: Box<dyn Producer>,
        path: impl AsRef<Path>,
    ) -> Result<Sensor> {
        let name = name.into();
        let registry = &self.inner.registry;
        registry.validate(&name)?;

        let first = producer.read().map_err(|source| Error::Producer {
            sensor: name.clone(),
            source,
        })?;
        first.validate().map_err(|reason| Error::InvalidReading {
            sensor: name.clone(),
            reason: format!("producer must return a usable reading: {}", reason),
        })?;

        let log_config = &self.inner.config.log;
        let path = resolve_path(path.as_ref(), log_config.per_run_suffix);
        let log = CsvLog::create(path, &first, log_config.timestamp_column)
            .map_err(|e| log_error(&name, e, false))?;

        registry.register(&name, log.path().to_path_buf())?;
        info!("Sensor '{}' logging to {}", name, log.path().display());

        Ok(Sensor {
            name,
            producer: Mutex::new(producer),
            log,
            policy: log_config.on_send_failure,
            transport: self.inner.transport.clone(),
            registry: registry.clone(),
        })
    }

    /// Stops the built-in server. Later sends through it fail.
    pub async fn shutdown(&self) {
        if let Some(hub) = &self.inner.hub {
            hub.shutdown().await;
        }
    }
}

/// A named binding of a producer to a CSV log and the frontend.
pub struct Sensor {
    name: String,
    producer: Mutex<Box<dyn Producer>>,
    log: CsvLog,
    policy: OnSendFailure,
    transport: Arc<dyn Transport>,
    registry: Registry,
}

impl Sensor {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the CSV file this sensor appends to.
    pub fn csv_path(&self) -> &Path {
        self.log.path()
    }

    /// Reads the producer, sends the reading and appends it to the log.
    ///
    /// A failing producer or an unusable reading stops before anything is
    /// sent or written. With [`OnSendFailure::KeepRow`] the row is written
    /// before sending, with [`OnSendFailure::DropRow`] only after a
    /// successful send. Returns the payload that was delivered.
    pub async fn execute(&self) -> Result<Payload> {
        let reading = self.read()?;
        let payload = Payload::new(self.name.clone(), reading);

        match self.policy {
            OnSendFailure::KeepRow => {
                self.append(&payload.data, false).await?;
                self.transmit(&payload, true).await?;
            }
            OnSendFailure::DropRow => {
                self.transmit(&payload, false).await?;
                self.append(&payload.data, true).await?;
            }
        }

        Ok(payload)
    }

    fn read(&self) -> Result<Reading> {
        let result = match self.producer.lock() {
            Ok(mut producer) => producer.read(),
            Err(_) => Err(anyhow::anyhow!("producer panicked during an earlier read")),
        };
        let reading = result.map_err(|source| Error::Producer {
            sensor: self.name.clone(),
            source,
        })?;

        reading
            .validate()
            .map_err(|reason| Error::InvalidReading {
                sensor: self.name.clone(),
                reason,
            })?;
        self.log
            .check(&reading)
            .map_err(|e| log_error(&self.name, e, false))?;
        Ok(reading)
    }

    async fn append(&self, reading: &Reading, transmitted: bool) -> Result<()> {
        let timestamp = chrono::Utc::now().timestamp();
        self.log
            .append(reading, timestamp)
            .await
            .map_err(|e| log_error(&self.name, e, transmitted))
    }

    async fn transmit(&self, payload: &Payload, logged: bool) -> Result<()> {
        match self.transport.send(payload).await {
            Ok(reached) => {
                debug!("Sensor '{}' reading reached {} receivers", self.name, reached);
                Ok(())
            }
            Err(source) => {
                warn!(
                    "Sending reading of sensor '{}' via {} failed: {}",
                    self.name,
                    self.transport.name(),
                    source
                );
                Err(Error::Transmit {
                    sensor: self.name.clone(),
                    logged,
                    source,
                })
            }
        }
    }
}

impl Drop for Sensor {
    fn drop(&mut self) {
        self.registry.unregister(&self.name);
    }
}

impl std::fmt::Debug for Sensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sensor")
            .field("name", &self.name)
            .field("csv_path", &self.log.path())
            .field("policy", &self.policy)
            .finish()
    }
}

fn log_error(sensor: &str, err: LogError, transmitted: bool) -> Error {
    match err {
        LogError::Mismatch { expected, found } => Error::InvalidReading {
            sensor: sensor.to_string(),
            reason: format!("metrics {:?} do not match log header {:?}", found, expected),
        },
        LogError::Io(source) => Error::Write {
            sensor: sensor.to_string(),
            transmitted,
            source,
        },
    }
}

/// Path a sensor logs to for `base`, honoring `per_run_suffix`.
fn resolve_path(base: &Path, per_run_suffix: bool) -> PathBuf {
    if per_run_suffix {
        csv_log::per_run_path(base, chrono::Utc::now().timestamp())
    } else {
        base.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::Recorder;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn handle(policy: OnSendFailure) -> (Wiresense, Arc<Recorder>, tempfile::TempDir) {
        let mut config = Config::default();
        config.log.on_send_failure = policy;
        let recorder = Arc::new(Recorder::default());
        let wiresense = Wiresense::with_transport(config, recorder.clone());
        (wiresense, recorder, tempfile::tempdir().unwrap())
    }

    fn temp() -> anyhow::Result<Reading> {
        Ok(Reading::new().with("Temp", 5))
    }

    fn rows(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn test_configure_and_single_reading() {
        let mut config = Config::with_port(0);
        config.server.host = "127.0.0.1".to_string();
        let wiresense = Wiresense::configure(config).await.unwrap();
        assert!(wiresense.local_addr().is_some());
        let mut live = wiresense.hub().unwrap().subscribe();

        let dir = tempfile::tempdir().unwrap();
        let sensor = wiresense
            .sensor("Temp", temp, dir.path().join("temp.csv"))
            .unwrap();
        let payload = sensor.execute().await.unwrap();

        assert_eq!(rows(sensor.csv_path()), ["Temp", "5"]);
        assert_eq!(&*live.recv().await.unwrap(), payload.to_json().unwrap());
        wiresense.shutdown().await;
    }

    #[tokio::test]
    async fn test_configure_with_host_name() {
        let mut config = Config::with_port(0);
        config.server.host = "localhost".to_string();
        let wiresense = Wiresense::configure(config).await.unwrap();
        let addr = wiresense.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        wiresense.shutdown().await;
    }

    #[tokio::test]
    async fn test_each_call_appends_one_row() {
        let (wiresense, recorder, dir) = handle(OnSendFailure::KeepRow);
        let mut n = 0;
        let sensor = wiresense
            .sensor(
                "counter",
                move || {
                    n += 1;
                    Ok(Reading::new().with("n", n).with("half", n as f64 / 2.0))
                },
                dir.path().join("counter.csv"),
            )
            .unwrap();

        for expected in 1..=3 {
            sensor.execute().await.unwrap();
            assert_eq!(rows(sensor.csv_path()).len(), expected + 1);
        }
        // The validation read during construction is neither logged nor sent
        assert_eq!(rows(sensor.csv_path()), ["n,half", "2,1", "3,1.5", "4,2"]);
        assert_eq!(recorder.sent().len(), 3);
    }

    #[tokio::test]
    async fn test_producer_failure_sends_and_writes_nothing() {
        let (wiresense, recorder, dir) = handle(OnSendFailure::KeepRow);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let sensor = wiresense
            .sensor(
                "flaky",
                move || {
                    if counter.fetch_add(1, Ordering::SeqCst) > 0 {
                        anyhow::bail!("i2c bus timeout");
                    }
                    temp()
                },
                dir.path().join("flaky.csv"),
            )
            .unwrap();

        let err = sensor.execute().await.unwrap_err();
        assert!(matches!(err, Error::Producer { ref sensor, .. } if sensor == "flaky"));
        assert_eq!(rows(sensor.csv_path()), ["Temp"]);
        assert!(recorder.sent().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalid_reading_rejected() {
        let (wiresense, recorder, dir) = handle(OnSendFailure::KeepRow);
        let mut first = true;
        let sensor = wiresense
            .sensor(
                "shifting",
                move || {
                    let reading = if first {
                        Reading::new().with("Temp", 5)
                    } else {
                        Reading::new().with("Pressure", 1013)
                    };
                    first = false;
                    Ok(reading)
                },
                dir.path().join("shifting.csv"),
            )
            .unwrap();

        assert!(matches!(
            sensor.execute().await,
            Err(Error::InvalidReading { .. })
        ));
        assert_eq!(rows(sensor.csv_path()), ["Temp"]);
        assert!(recorder.sent().is_empty());
    }

    #[tokio::test]
    async fn test_keep_row_on_send_failure() {
        let (wiresense, recorder, dir) = handle(OnSendFailure::KeepRow);
        let sensor = wiresense
            .sensor("Temp", temp, dir.path().join("temp.csv"))
            .unwrap();
        recorder.fail.store(true, Ordering::SeqCst);

        let err = sensor.execute().await.unwrap_err();
        assert!(matches!(err, Error::Transmit { logged: true, .. }));
        assert_eq!(rows(sensor.csv_path()), ["Temp", "5"]);
    }

    #[tokio::test]
    async fn test_drop_row_on_send_failure() {
        let (wiresense, recorder, dir) = handle(OnSendFailure::DropRow);
        let sensor = wiresense
            .sensor("Temp", temp, dir.path().join("temp.csv"))
            .unwrap();
        recorder.fail.store(true, Ordering::SeqCst);

        let err = sensor.execute().await.unwrap_err();
        assert!(matches!(err, Error::Transmit { logged: false, .. }));
        assert_eq!(rows(sensor.csv_path()), ["Temp"]);

        recorder.fail.store(false, Ordering::SeqCst);
        sensor.execute().await.unwrap();
        assert_eq!(rows(sensor.csv_path()), ["Temp", "5"]);
    }

    #[tokio::test]
    async fn test_write_failure_reported() {
        for (policy, transmitted) in [(OnSendFailure::KeepRow, false), (OnSendFailure::DropRow, true)] {
            let (wiresense, recorder, dir) = handle(policy);
            let sensor = wiresense
                .sensor("Temp", temp, dir.path().join("temp.csv"))
                .unwrap();
            // Replace the log with a directory so appending fails
            fs::remove_file(sensor.csv_path()).unwrap();
            fs::create_dir(sensor.csv_path()).unwrap();

            let err = sensor.execute().await.unwrap_err();
            assert!(
                matches!(err, Error::Write { transmitted: t, .. } if t == transmitted),
                "unexpected error: {err}"
            );
            assert_eq!(recorder.sent().len(), transmitted as usize);
        }
    }

    #[tokio::test]
    async fn test_concurrent_calls_do_not_interleave() {
        let (wiresense, recorder, dir) = handle(OnSendFailure::KeepRow);
        let sensor = Arc::new(
            wiresense
                .sensor(
                    "wide",
                    || Ok((0..32).map(|i| (format!("metric_{i}"), i)).collect()),
                    dir.path().join("wide.csv"),
                )
                .unwrap(),
        );

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let sensor = sensor.clone();
                tokio::spawn(async move { sensor.execute().await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let lines = rows(sensor.csv_path());
        assert_eq!(lines.len(), 17);
        let expected: Vec<String> = (0..32).map(|i| i.to_string()).collect();
        assert!(lines[1..].iter().all(|l| *l == expected.join(",")));
        assert_eq!(recorder.sent().len(), 16);
    }

    #[tokio::test]
    async fn test_timestamp_column_and_per_run_suffix() {
        let mut config = Config::default();
        config.log.timestamp_column = true;
        config.log.per_run_suffix = true;
        let wiresense = Wiresense::with_transport(config, Arc::new(Recorder::default()));
        let dir = tempfile::tempdir().unwrap();

        let sensor = wiresense
            .sensor("Temp", temp, dir.path().join("logs/temp.csv"))
            .unwrap();
        let file_name = sensor.csv_path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(file_name.starts_with("temp_") && file_name.ends_with(".csv"));

        sensor.execute().await.unwrap();
        let lines = rows(sensor.csv_path());
        assert_eq!(lines[0], "timestamp,Temp");
        let (ts, value) = lines[1].split_once(',').unwrap();
        assert!(ts.parse::<i64>().unwrap() > 0);
        assert_eq!(value, "5");
    }

    #[test]
    fn test_names_are_unique_and_released() {
        let (wiresense, _, dir) = handle(OnSendFailure::KeepRow);
        let sensor = wiresense.sensor("Temp", temp, dir.path().join("a.csv")).unwrap();
        assert!(matches!(
            wiresense.sensor("Temp", temp, dir.path().join("b.csv")),
            Err(Error::Registration(_))
        ));
        assert!(matches!(
            wiresense.sensor("bad\nname", temp, dir.path().join("c.csv")),
            Err(Error::Registration(_))
        ));
        assert_eq!(wiresense.sensor_names(), ["Temp"]);

        drop(sensor);
        assert!(wiresense.sensor_names().is_empty());
        wiresense.sensor("Temp", temp, dir.path().join("b.csv")).unwrap();
    }

    #[test]
    fn test_construction_validates_producer() {
        let (wiresense, _, dir) = handle(OnSendFailure::KeepRow);
        assert!(matches!(
            wiresense.sensor("empty", || Ok(Reading::new()), dir.path().join("e.csv")),
            Err(Error::InvalidReading { .. })
        ));
        assert!(matches!(
            wiresense.sensor(
                "broken",
                || Err(anyhow::anyhow!("no device")),
                dir.path().join("b.csv")
            ),
            Err(Error::Producer { .. })
        ));
        assert!(wiresense.sensor_names().is_empty());
        assert!(!dir.path().join("e.csv").exists());
    }

    #[tokio::test]
    async fn test_configure_requires_a_transport() {
        let mut config = Config::default();
        config.server.enable = false;
        assert!(matches!(
            Wiresense::configure(config).await,
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_push_failure_surfaces_as_transmit() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut config = Config::default();
        config.server.enable = false;
        config.push.url = Some(format!("http://{}/readings", addr));
        config.push.timeout_ms = 2000;
        let wiresense = Wiresense::configure(config).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let sensor = wiresense
            .sensor("Temp", temp, dir.path().join("temp.csv"))
            .unwrap();
        let err = sensor.execute().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Transmit {
                logged: true,
                source: crate::TransportError::Http(_),
                ..
            }
        ));
        assert_eq!(rows(sensor.csv_path()), ["Temp", "5"]);
    }

    struct Thermometer {
        celsius: f64,
    }

    impl Producer for Thermometer {
        fn read(&mut self) -> anyhow::Result<Reading> {
            self.celsius += 0.5;
            Ok(Reading::new().with("celsius", self.celsius))
        }
    }

    #[tokio::test]
    async fn test_struct_producer() {
        let (wiresense, recorder, dir) = handle(OnSendFailure::KeepRow);
        let sensor = wiresense
            .sensor_from("thermo", Thermometer { celsius: 20.0 }, dir.path().join("t.csv"))
            .unwrap();
        let payload = sensor.execute().await.unwrap();
        assert_eq!(payload.data.get("celsius").unwrap().as_f64(), 21.0);
        assert_eq!(rows(sensor.csv_path()), ["celsius", "21"]);
        assert_eq!(
            recorder.sent(),
            [r#"{"key":"thermo","data":{"celsius":21.0}}"#]
        );
    }
}
