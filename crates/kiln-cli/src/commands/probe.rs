use super::{json_pretty, EXIT_SUCCESS};
use console::Style;
use kiln_runtime::{probe, CgroupLayout};

pub fn run(json: bool) -> Result<u8, String> {
    let caps = probe();

    if json {
        println!("{}", json_pretty(&caps)?);
        return Ok(EXIT_SUCCESS);
    }

    let layout = match caps.cgroup_layout {
        CgroupLayout::V1 => "v1",
        CgroupLayout::V2 => "v2",
        CgroupLayout::None => "none",
    };
    println!("cgroup layout: {layout}");
    println!("cpus: {}", if caps.cpus.is_empty() { "-".to_owned() } else { caps.cpus.to_string() });
    println!("mems: {}", if caps.mems.is_empty() { "-".to_owned() } else { caps.mems.to_string() });
    println!();

    let green = Style::new().green();
    let red = Style::new().red();
    for (name, supported) in caps.features() {
        if supported {
            println!("  {} {name}", green.apply_to("✓"));
        } else {
            println!("  {} {name}", red.apply_to("✗"));
        }
    }
    Ok(EXIT_SUCCESS)
}
