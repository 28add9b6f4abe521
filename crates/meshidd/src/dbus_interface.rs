use crate::engine::{EngineError, EngineHandle, EngineStatus};
use crate::scheduler::{DetectionScheduler, IntervalTicks, SchedulerHandle, TracingRenderer};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::Mutex;
use zbus::interface;

pub const BUS_NAME: &str = "org.freedesktop.MeshId1";
pub const OBJECT_PATH: &str = "/org/freedesktop/MeshId1";

/// D-Bus interface for the meshid face verification daemon.
///
/// Bus name: org.freedesktop.MeshId1
/// Object path: /org/freedesktop/MeshId1
pub struct MeshIdService {
    engine: EngineHandle,
    tick_interval: Duration,
    scheduler: Mutex<Option<SchedulerHandle<TracingRenderer>>>,
}

impl MeshIdService {
    pub fn new(engine: EngineHandle, tick_interval: Duration) -> Self {
        Self {
            engine,
            tick_interval,
            scheduler: Mutex::new(None),
        }
    }
}

/// Errors reach clients as `org.freedesktop.DBus.Error.Failed` with the
/// error kind as message prefix, e.g. `NoFaceDetected: no face detected`.
fn to_fdo(e: EngineError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(format!("{}: {e}", e.kind()))
}

#[derive(Serialize)]
struct StatusReply<'a> {
    version: &'static str,
    session: &'a EngineStatus,
    detection_loop: bool,
}

fn to_json<T: Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

#[interface(name = "org.freedesktop.MeshId1")]
impl MeshIdService {
    /// Acquire the camera and start the detection loop.
    async fn start_session(&self) -> zbus::fdo::Result<String> {
        tracing::info!("start_session requested");
        let state = self.engine.start_session().await.map_err(to_fdo)?;

        let mut scheduler = self.scheduler.lock().await;
        if !scheduler.as_ref().is_some_and(|s| s.is_running()) {
            *scheduler = Some(DetectionScheduler::start(
                self.engine.clone(),
                IntervalTicks::new(self.tick_interval),
                TracingRenderer::default(),
            ));
        }

        Ok(state.to_string())
    }

    /// Stop the detection loop and release the camera.
    async fn stop_session(&self) -> zbus::fdo::Result<String> {
        tracing::info!("stop_session requested");
        if let Some(scheduler) = self.scheduler.lock().await.take() {
            if let Err(e) = scheduler.stop().await {
                tracing::warn!(error = %e, "detection loop ended abnormally");
            }
        }
        let state = self.engine.stop_session().await.map_err(to_fdo)?;
        Ok(state.to_string())
    }

    /// Capture the current face and store it as the enrolled template.
    async fn enroll(&self) -> zbus::fdo::Result<String> {
        tracing::info!("enroll requested");
        let outcome = self.engine.enroll().await.map_err(to_fdo)?;
        to_json(&outcome)
    }

    /// Compare the current face against the enrolled template.
    ///
    /// Returns JSON: `{"score": f32, "verdict": "accept"|"reject", "threshold": f32}`.
    async fn authenticate(&self) -> zbus::fdo::Result<String> {
        tracing::info!("authenticate requested");
        let outcome = self.engine.authenticate().await.map_err(to_fdo)?;
        to_json(&outcome)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(to_fdo)?;
        let detection_loop = self
            .scheduler
            .lock()
            .await
            .as_ref()
            .is_some_and(|s| s.is_running());

        to_json(&StatusReply {
            version: env!("CARGO_PKG_VERSION"),
            session: &status,
            detection_loop,
        })
    }

    /// Remove the enrolled template.
    async fn clear_template(&self) -> zbus::fdo::Result<bool> {
        tracing::info!("clear_template requested");
        self.engine.clear_template().await.map_err(to_fdo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::*;
    use crate::store::MemoryTemplateStore;

    fn service() -> (MeshIdService, Recorder) {
        let (engine, recorder) = engine_with(
            FakeCamera::new(),
            Some(face_a()),
            MemoryTemplateStore::default(),
            SETTINGS,
        );
        (MeshIdService::new(engine, Duration::from_millis(5)), recorder)
    }

    async fn status_json(service: &MeshIdService) -> serde_json::Value {
        serde_json::from_str(&service.status().await.unwrap()).unwrap()
    }

    async fn wait_for_inferences(recorder: &Recorder, count: usize) {
        for _ in 0..400 {
            if recorder.timestamps().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("only {} inferences ran", recorder.timestamps().len());
    }

    #[tokio::test]
    async fn test_start_session_runs_detection_loop() {
        let (service, recorder) = service();
        assert_eq!(service.start_session().await.unwrap(), "camera_active");
        assert_eq!(status_json(&service).await["detection_loop"], true);

        wait_for_inferences(&recorder, 3).await;
        assert_eq!(status_json(&service).await["session"]["state"], "detecting");

        service.stop_session().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_session_twice_keeps_one_loop() {
        let (service, recorder) = service();
        service.start_session().await.unwrap();
        wait_for_inferences(&recorder, 1).await;
        service.start_session().await.unwrap();
        wait_for_inferences(&recorder, 4).await;

        service.stop_session().await.unwrap();
        let stamps = recorder.timestamps();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]), "{stamps:?}");
    }

    #[tokio::test]
    async fn test_stop_session_cancels_detection_loop() {
        let (service, recorder) = service();
        service.start_session().await.unwrap();
        wait_for_inferences(&recorder, 3).await;

        assert_eq!(service.stop_session().await.unwrap(), "idle");
        let after_stop = recorder.timestamps().len();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(recorder.timestamps().len(), after_stop);

        let status = status_json(&service).await;
        assert_eq!(status["detection_loop"], false);
        assert_eq!(status["session"]["state"], "idle");

        match service.enroll().await {
            Err(zbus::fdo::Error::Failed(msg)) => {
                assert!(msg.starts_with("SessionNotReady:"), "{msg}")
            }
            other => panic!("expected SessionNotReady, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_status_reports_configured_threshold() {
        let (service, _recorder) = service();
        let reply = service.status().await.unwrap();
        assert!(reply.contains("\"threshold\":0.9,"), "{reply}");
        assert!(reply.contains("\"detection_loop\":false"), "{reply}");
    }

    #[tokio::test]
    async fn test_enroll_and_authenticate_replies() {
        let (service, recorder) = service();
        service.start_session().await.unwrap();
        wait_for_inferences(&recorder, 1).await;

        let enrolled: serde_json::Value =
            serde_json::from_str(&service.enroll().await.unwrap()).unwrap();
        assert_eq!(enrolled["dimension"], 6);

        let reply = service.authenticate().await.unwrap();
        let outcome: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(outcome["verdict"], "accept");
        assert!(reply.contains("\"threshold\":0.9"), "{reply}");

        assert!(service.clear_template().await.unwrap());
        assert!(!service.clear_template().await.unwrap());
        service.stop_session().await.unwrap();
    }
}
