//! The chart page served at `GET /`.
//!
//! The page is a single self-contained HTML document.  All rendering happens
//! in the browser: it opens a WebSocket to `/ws` on the host it was loaded
//! from and plots `currentTemp` and `targetTemp` from every JSON message as
//! two step lines.

const TEMPLATE: &str = r##"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Tempdeck: monitoring {{TOPIC}}</title>
<script src="https://cdn.canvasjs.com/canvasjs.min.js"></script>
<link href="https://fonts.googleapis.com/css?family=Roboto+Slab:400,300,100,700" rel="stylesheet" type="text/css">
<style>
body{background-color:#B02731;color:#F9FFC3;margin:0}
h1{font-size:40px;color:#FC3846}
h1,h3,p{font-family:"Roboto Slab",serif}
#header{width:50%;margin:0 auto;text-align:center}
#chartarea{height:400px;width:70%;margin:20px auto 0 auto}
#status{text-align:center;font-family:"Roboto Slab",serif;font-size:14px}
.title{color:#FFA498}
</style>
</head>
<body>
<div id="header">
  <h1>Tempdeck</h1>
  <h3><span class="title">Broker:</span> {{BROKER}}<br>
  <span class="title">Topic:</span> {{TOPIC}}</h3>
</div>
<div id="chartarea"></div>
<p id="status">connecting</p>
<script>
window.onload = function () {
  var actual = [];
  var target = [];
  var axisFont = { labelFontColor: "white", labelFontFamily: "Roboto Slab", labelFontSize: 16 };

  var chart = new CanvasJS.Chart("chartarea", {
    backgroundColor: "#FC3846",
    zoomEnabled: true,
    title: { text: "Temperature", fontSize: 22, fontFamily: "Roboto Slab", fontColor: "white" },
    toolTip: { enabled: false },
    legend: { fontFamily: "Roboto Slab", fontColor: "white", fontSize: 14 },
    axisY: Object.assign({ includeZero: false, suffix: "C", gridColor: "#FF5047" }, axisFont),
    axisX: Object.assign({ margin: 10 }, axisFont),
    data: [
      { color: "#F9FFC3", type: "stepLine", xValueType: "dateTime", showInLegend: true, name: "Actual", dataPoints: actual },
      { color: "#FFA498", type: "stepLine", xValueType: "dateTime", showInLegend: true, name: "Target", dataPoints: target }
    ]
  });
  chart.render();

  var status = document.getElementById("status");

  function plot(text) {
    var reading;
    try {
      reading = JSON.parse(text);
    } catch (e) {
      console.log("ignoring non-JSON message", text);
      return;
    }
    var now = Date.now();
    actual.push({ x: now, y: parseFloat(reading.currentTemp) });
    target.push({ x: now, y: parseFloat(reading.targetTemp) });
    chart.render();
  }

  var scheme = location.protocol === "https:" ? "wss://" : "ws://";
  var socket = new WebSocket(scheme + location.host + "/ws");
  socket.onopen = function () { status.textContent = "live"; };
  socket.onclose = function () { status.textContent = "disconnected"; };
  socket.onerror = function (e) { console.log("websocket error", e); };
  socket.onmessage = function (e) {
    if (typeof e.data === "string") {
      plot(e.data);
    }
  };
};
</script>
</body>
</html>
"##;

/// Renders the chart page for `broker` and `topic`.
///
/// Both values are HTML-escaped and substituted in a single pass over the
/// template, so placeholder text inside a value is left as is.
pub fn render_viewer_page(broker: &str, topic: &str) -> String {
    let broker = escape_html(broker);
    let topic = escape_html(topic);
    let mut out = String::with_capacity(TEMPLATE.len() + broker.len() + topic.len());
    let mut rest = TEMPLATE;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        if let Some(after) = tail.strip_prefix("{{BROKER}}") {
            out.push_str(&broker);
            rest = after;
        } else if let Some(after) = tail.strip_prefix("{{TOPIC}}") {
            out.push_str(&topic);
            rest = after;
        } else {
            out.push_str("{{");
            rest = &tail[2..];
        }
    }
    out.push_str(rest);
    out
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
