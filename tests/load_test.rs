//! Load testing for the gateway.

use std::time::{Duration, Instant};

use api_gateway::config::LoadBalancingPolicy;

mod common;

#[tokio::test]
async fn test_load_performance() {
    let b1 = common::start_mock_backend("Hello from b1").await;
    let b2 = common::start_mock_backend("Hello from b2").await;

    let mut config = common::base_config();
    let mut service = common::service("web", &[b1.addr, b2.addr]);
    service.load_balancing = LoadBalancingPolicy::LeastConnections;
    for instance in &mut service.instances {
        instance.max_connections = 1000;
    }
    config.services.push(service);
    config.routes.push(common::route("r1", "/*", "web"));
    config.retries.enabled = false;

    let gateway = common::spawn_gateway(config).await;

    let concurrency = 20;
    let requests_per_task = 25;
    let total_requests = concurrency * requests_per_task;

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let start = Instant::now();

    let mut tasks = Vec::new();
    for _ in 0..concurrency {
        let client = client.clone();
        let url = gateway.url("/load");
        tasks.push(tokio::spawn(async move {
            let mut latencies = Vec::new();
            for _ in 0..requests_per_task {
                let req_start = Instant::now();
                if let Ok(res) = client.get(&url).send().await {
                    if res.status().is_success() {
                        latencies.push(req_start.elapsed());
                    }
                }
            }
            latencies
        }));
    }

    let mut all_latencies: Vec<Duration> = Vec::new();
    for task in tasks {
        all_latencies.extend(task.await.unwrap());
    }

    let duration = start.elapsed();
    let rps = total_requests as f64 / duration.as_secs_f64();

    assert_eq!(all_latencies.len(), total_requests, "every request should succeed");
    assert_eq!(b1.hits() + b2.hits(), total_requests as u32);
    assert!(b1.hits() > 0 && b2.hits() > 0, "both instances should receive traffic");

    all_latencies.sort();
    let p50 = all_latencies[all_latencies.len() / 2];
    let p95 = all_latencies[(all_latencies.len() as f64 * 0.95) as usize];
    let p99 = all_latencies[(all_latencies.len() as f64 * 0.99) as usize];

    println!("\n--- Load Test Results ---");
    println!("Total Requests: {}", total_requests);
    println!("Concurrency:    {}", concurrency);
    println!("Total Duration: {:?}", duration);
    println!("Requests/sec:   {:.2}", rps);
    println!("P50 Latency:    {:?}", p50);
    println!("P95 Latency:    {:?}", p95);
    println!("P99 Latency:    {:?}", p99);
    println!("Split:          b1={} b2={}", b1.hits(), b2.hits());
    println!("-------------------------\n");

    gateway.shutdown.trigger();
}
