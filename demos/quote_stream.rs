use futures::StreamExt;
use omniston_sdk::{
    Address, Omniston, OmnistonConfig, QuoteAmount, QuoteRequest, QuoteResponseEvent,
    SettlementMethod,
};
use std::time::Duration;

const TON: &str = "EQAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAM9c";
const USDT: &str = "EQCxE6mUtQJKFnGfaROTKOt1lZbDiiX1kCixRv7Nw2Id_sDs";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // OMNISTON_API_URL and friends may come from a .env file
    let config = match OmnistonConfig::from_env_file("OMNISTON") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return Ok(());
        }
    };

    println!("Connecting to {}", config.api_url);
    let omniston = Omniston::new(config);

    let assets = omniston.asset_list().await?;
    println!("Found {} assets:", assets.assets.len());
    for asset in assets.assets.iter().take(5) {
        println!("  {} ({}), decimals {}", asset.symbol, asset.name, asset.decimals);
    }

    let request = QuoteRequest {
        bid_asset_address: Address::ton(TON),
        ask_asset_address: Address::ton(USDT),
        amount: QuoteAmount::BidUnits("1000000000".to_string()),
        referrer_address: None,
        referrer_fee_bps: 0,
        settlement_methods: vec![SettlementMethod::Swap],
        settlement_params: None,
    };

    let mut quotes = omniston.request_for_quote(&request);
    let deadline = tokio::time::sleep(Duration::from_secs(30));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            () = &mut deadline => break,
            event = quotes.next() => match event {
                Some(Ok(QuoteResponseEvent::Ack { rfq_id })) => println!("RFQ {} acknowledged", rfq_id),
                Some(Ok(QuoteResponseEvent::QuoteUpdated { quote, .. })) => {
                    println!(
                        "Quote {} from {}: {} -> {}",
                        quote.quote_id, quote.resolver_name, quote.bid_units, quote.ask_units
                    );
                    break;
                }
                Some(Ok(QuoteResponseEvent::NoQuote { .. })) => println!("No quote available"),
                Some(Ok(QuoteResponseEvent::Unsubscribed { .. })) | None => break,
                Some(Err(e)) => {
                    eprintln!("Quote stream failed: {}", e);
                    break;
                }
            }
        }
    }

    quotes.unsubscribe();
    omniston.close();
    Ok(())
}
