//! One function per menu entry. Each drives its RPC to completion, prints the
//! outcome and records it in the [`History`].

use crate::menu::{History, StreamInput, parse_number, parse_query, parse_sample, results_table};
use farming_tonic_core::proto::{
    FertilizerRequest, TemperatureRequest, farm_service_client::FarmServiceClient,
};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use tonic::transport::Channel;

pub type Client = FarmServiceClient<Channel>;

/// Buffered requests on the client-to-server half of a streaming call.
const OUTBOUND_BUFFER: usize = 8;

/// Line-oriented stdin reader.
pub struct Prompt {
    lines: Lines<BufReader<Stdin>>,
}

impl Default for Prompt {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompt {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    /// Prints `question` and waits for one line. `None` once stdin is closed.
    pub async fn ask(&mut self, question: &str) -> anyhow::Result<Option<String>> {
        print!("{question}");
        std::io::stdout().flush()?;
        Ok(self.lines.next_line().await?)
    }
}

pub async fn fertilizer(
    client: &mut Client,
    prompt: &mut Prompt,
    history: &mut History,
) -> anyhow::Result<()> {
    let acres = loop {
        let Some(line) = prompt.ask("Enter the area for fertilizer calculation: ").await? else {
            return Ok(());
        };
        match parse_number(&line) {
            Ok(acres) => break acres,
            Err(e) => eprintln!("{e}"),
        }
    };

    let resp = client
        .calculate(FertilizerRequest { acres })
        .await?
        .into_inner();

    let mut table = results_table(&["Description", "Amount (kg)"], &[30, 20]);
    table.add_row(vec![
        "Fertilizer Needed".to_string(),
        format!("{:.2}", resp.total_nitrogen_needed_kg),
    ]);
    println!("{table}");

    history.push(format!(
        "The amount of fertilizer needed is: {:.2} kg",
        resp.total_nitrogen_needed_kg
    ));
    Ok(())
}

pub async fn temperature(
    client: &mut Client,
    prompt: &mut Prompt,
    history: &mut History,
) -> anyhow::Result<()> {
    let Some(sensor_id) = prompt
        .ask("Enter sensor ID for temperature data stream: ")
        .await?
    else {
        return Ok(());
    };

    let mut stream = client
        .temperature_stream(TemperatureRequest {
            sensor_id: sensor_id.trim().to_string(),
        })
        .await?
        .into_inner();

    let mut table = results_table(&["Sensor ID", "Temperature (°C)", "Timestamp"], &[15, 20, 30]);
    while let Some(reading) = stream.next().await {
        let reading = reading?;
        let row = vec![
            reading.sensor_id,
            format!("{:.1}", reading.temperature),
            reading.timestamp,
        ];
        println!("{}", row.join(", "));
        history.push(row.join(", "));
        table.add_row(row);
    }

    println!("{table}");
    println!("Temperature stream ended by the server.");
    Ok(())
}

pub async fn average_moisture(
    client: &mut Client,
    prompt: &mut Prompt,
    history: &mut History,
) -> anyhow::Result<()> {
    let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
    let mut call_client = client.clone();
    let call = tokio::spawn(async move {
        call_client
            .compute_average(ReceiverStream::new(rx))
            .await
    });

    loop {
        let Some(line) = prompt
            .ask("Enter soil moisture readings (wet, dry), or \"done\" to finish: ")
            .await?
        else {
            break;
        };
        match parse_sample(&line) {
            Ok(StreamInput::Message(sample)) => {
                if tx.send(sample).await.is_err() {
                    // The call already finished, most likely with an error.
                    break;
                }
            }
            Ok(StreamInput::Done) => break,
            Err(e) => eprintln!("{e}"),
        }
    }
    drop(tx);

    let resp = call.await??.into_inner();

    let mut table = results_table(&["Description", "Average Moisture (%)"], &[30, 25]);
    table.add_row(vec![
        "Average Soil Moisture".to_string(),
        format!("{:.2}", resp.soil_moisture_percentage),
    ]);
    println!("{table}");

    history.push(format!(
        "The average soil moisture percentage is: {:.2}%",
        resp.soil_moisture_percentage
    ));
    Ok(())
}

pub async fn optimal_watering(
    client: &mut Client,
    prompt: &mut Prompt,
    history: &mut History,
) -> anyhow::Result<()> {
    let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
    let mut responses = client
        .find_optimum(ReceiverStream::new(rx))
        .await?
        .into_inner();

    let printer = tokio::spawn(async move {
        let mut answered = Vec::new();
        while let Some(rec) = responses.next().await {
            let rec = rec?;
            println!(
                "Moisture: {:.2}, Recommended Water Level: {:.2} mm",
                rec.input_moisture, rec.recommended_level
            );
            answered.push(rec);
        }
        Ok::<_, tonic::Status>(answered)
    });

    loop {
        let Some(line) = prompt
            .ask("Enter current moisture reading, or \"done\" to finish: ")
            .await?
        else {
            break;
        };
        match parse_query(&line) {
            Ok(StreamInput::Message(query)) => {
                if tx.send(query).await.is_err() {
                    break;
                }
            }
            Ok(StreamInput::Done) => break,
            Err(e) => eprintln!("{e}"),
        }
    }
    drop(tx);

    let answered = printer.await??;
    let mut table = results_table(&["Input Moisture", "Optimal Watering Level"], &[20, 25]);
    for rec in answered {
        history.push(format!(
            "Moisture: {:.2}, Recommended Water Level: {:.2} mm",
            rec.input_moisture, rec.recommended_level
        ));
        table.add_row(vec![
            format!("{:.2}", rec.input_moisture),
            format!("{:.2}", rec.recommended_level),
        ]);
    }
    println!("{table}");
    println!("Stream ended.");
    Ok(())
}
