use settlement_worker::{sign, verify_webhook_request, SIGNATURE_HEADER};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let secret = b"whsec_demo";
    let payload = br#"{"event":"payment.success","data":{"payment":{"id":"pay_1","amount":1000,"status":"success"}},"created_at":1700000000}"#;

    // What the worker would send along with the body.
    let signature = sign(secret, payload)?;
    let headers = vec![
        ("Content-Type", "application/json"),
        (SIGNATURE_HEADER, signature.as_str()),
    ];

    match verify_webhook_request(headers.iter().copied(), payload, secret) {
        Ok(()) => println!("signature valid"),
        Err(err) => println!("rejected: {err}"),
    }

    // Re-serializing the body before verifying breaks the signature.
    let reformatted = br#"{ "event": "payment.success" }"#;
    if let Err(err) = verify_webhook_request(headers.iter().copied(), reformatted, secret) {
        println!("reformatted body rejected: {err}");
    }

    Ok(())
}
