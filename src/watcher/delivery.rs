//! Hands emitted events to the incident log and the dispatcher.

use crate::debounce::OutgoingEvent;
use crate::dispatch::Dispatcher;
use crate::incident::IncidentRecorder;

use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// Record and dispatch every event from `events`.
///
/// Each event is dispatched on its own task so a slow retry loop never holds
/// up the next event. Returns once the channel is closed and every in-flight
/// delivery has finished.
pub async fn run_delivery(
    mut events: mpsc::Receiver<OutgoingEvent>,
    dispatcher: Dispatcher,
    recorder: IncidentRecorder,
) {
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    recorder.record(&event);
                    let dispatcher = dispatcher.clone();
                    in_flight.spawn(async move {
                        let reports = dispatcher.dispatch(&event).await;
                        let delivered = reports.iter().filter(|r| r.delivered()).count();
                        tracing::info!(
                            event = %event.event,
                            delivered,
                            endpoints = reports.len(),
                            "Event dispatched"
                        );
                    });
                }
                None => break,
            },
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!("Dispatch task failed: {}", e);
                }
            }
        }
    }

    if !in_flight.is_empty() {
        tracing::info!("Waiting for {} in-flight deliveries", in_flight.len());
    }
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            tracing::error!("Dispatch task failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests::sample_event;
    use crate::dispatch::{AirflowEndpoint, Endpoint, RetryPolicy};
    use crate::config::AirflowSettings;
    use crate::incident::IncidentLog;
    use httpmock::{Method::POST, MockServer};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_events_are_recorded_and_dispatched() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/v1/dags/node_health_alert/dagRuns");
                then.status(200);
            })
            .await;

        let settings = AirflowSettings {
            base_url: server.base_url(),
            dag_id: "node_health_alert".to_string(),
            username: "airflow".to_string(),
            password: "airflow".to_string(),
            max_retries: 1,
            timeout: Duration::from_secs(5),
        };
        let endpoint: Arc<dyn Endpoint> = Arc::new(AirflowEndpoint::new(&settings, RetryPolicy::default()).unwrap());
        let dispatcher = Dispatcher::new(vec![endpoint]);

        let dir = tempdir().unwrap();
        let path = dir.path().join("incidents.ndjson");
        let (recorder, writer) = IncidentRecorder::spawn(IncidentLog::new(&path));

        let (tx, rx) = mpsc::channel(4);
        let delivery = tokio::spawn(run_delivery(rx, dispatcher, recorder));

        // The same event twice: two deliveries, two records.
        tx.send(sample_event()).await.unwrap();
        tx.send(sample_event()).await.unwrap();
        drop(tx);

        delivery.await.unwrap();
        writer.await.unwrap();

        mock.assert_hits_async(2).await;
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
